use std::ops::{Deref, DerefMut};
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::key::GenericKey;
use crate::index::btree::page::tree_page::{self, BTreePageHeader, IndexPageType, TREE_PAGE_HEADER_SIZE};

/// Leaf header = common header + next-leaf pointer
pub const LEAF_PAGE_HEADER_SIZE: usize = TREE_PAGE_HEADER_SIZE + 4;

/// Typed view over a leaf page: a sorted array of `(key, rid)` entries
/// after the header, threaded to the next leaf for ordered iteration.
///
/// The view is generic over how the page is borrowed so the same
/// accessors serve read-latched and write-latched callers.
pub struct LeafPage<B, const N: usize> {
    page: B,
}

impl<B, const N: usize> LeafPage<B, N>
where
    B: Deref<Target = Page>,
{
    const ENTRY_SIZE: usize = N + 8;

    pub fn new(page: B) -> Self {
        debug_assert_eq!(tree_page::page_type(&page), Some(IndexPageType::Leaf));
        Self { page }
    }

    /// Largest number of entries a leaf of this key width can hold
    pub fn capacity() -> usize {
        (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        tree_page::size(&self.page)
    }

    pub fn max_size(&self) -> usize {
        tree_page::max_size(&self.page)
    }

    /// Underflow threshold for a non-root leaf
    pub fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    pub fn page_id(&self) -> PageId {
        tree_page::page_id(&self.page)
    }

    pub fn parent_page_id(&self) -> PageId {
        tree_page::parent_page_id(&self.page)
    }

    pub fn is_root(&self) -> bool {
        tree_page::is_root(&self.page)
    }

    pub fn next_page_id(&self) -> PageId {
        LittleEndian::read_u32(&self.page.data[TREE_PAGE_HEADER_SIZE..LEAF_PAGE_HEADER_SIZE])
    }

    pub fn key_at(&self, index: usize) -> GenericKey<N> {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index);
        GenericKey::from_bytes(&self.page.data[offset..offset + N])
    }

    pub fn value_at(&self, index: usize) -> Rid {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index) + N;
        Rid::new(
            LittleEndian::read_u32(&self.page.data[offset..offset + 4]),
            LittleEndian::read_u32(&self.page.data[offset + 4..offset + 8]),
        )
    }

    /// Binary search: `Ok(index)` of an equal key, else `Err(insertion
    /// point)`.
    pub fn lookup(&self, key: &GenericKey<N>) -> Result<usize, usize> {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = (low + high) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        Err(low)
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_PAGE_HEADER_SIZE + index * Self::ENTRY_SIZE
    }
}

impl<B, const N: usize> LeafPage<B, N>
where
    B: DerefMut<Target = Page>,
{
    /// Format an empty leaf in place
    pub fn init(page: B, page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        debug_assert!(max_size >= 2 && max_size <= Self::capacity());
        let mut this = Self { page };
        this.page.data.fill(0);
        let header = BTreePageHeader {
            page_type: IndexPageType::Leaf,
            size: 0,
            max_size: max_size as u16,
            parent_page_id,
            page_id,
        };
        this.page.data[..TREE_PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        this.set_next_page_id(INVALID_PAGE_ID);
        this
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        LittleEndian::write_u32(
            &mut self.page.data[TREE_PAGE_HEADER_SIZE..LEAF_PAGE_HEADER_SIZE],
            next,
        );
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        tree_page::set_parent_page_id(&mut self.page, parent);
    }

    /// Insert an entry, shifting the tail right
    pub fn insert_at(&mut self, index: usize, key: &GenericKey<N>, rid: Rid) {
        let size = self.size();
        debug_assert!(index <= size && size < Self::capacity());

        let start = Self::entry_offset(index);
        let end = Self::entry_offset(size);
        self.page.data.copy_within(start..end, start + Self::ENTRY_SIZE);

        self.page.data[start..start + N].copy_from_slice(key.as_bytes());
        LittleEndian::write_u32(&mut self.page.data[start + N..start + N + 4], rid.page_id);
        LittleEndian::write_u32(
            &mut self.page.data[start + N + 4..start + N + 8],
            rid.slot_num,
        );
        tree_page::set_size(&mut self.page, size + 1);
    }

    /// Remove the entry at `index`, shifting the tail left
    pub fn remove_at(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);

        let start = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        self.page
            .data
            .copy_within(start..end, Self::entry_offset(index));
        tree_page::set_size(&mut self.page, size - 1);
    }

    /// Move entries `[from..size)` to the back of `other`
    pub fn move_tail_to<B2>(&mut self, from: usize, other: &mut LeafPage<B2, N>)
    where
        B2: DerefMut<Target = Page>,
    {
        let size = self.size();
        debug_assert!(from <= size);
        let count = size - from;

        let src_start = Self::entry_offset(from);
        let src_end = Self::entry_offset(size);
        let dst_start = Self::entry_offset(other.size());
        let other_size = other.size();
        other.page.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.page.data[src_start..src_end]);

        tree_page::set_size(&mut other.page, other_size + count);
        tree_page::set_size(&mut self.page, from);
    }
}
