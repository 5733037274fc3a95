use std::ops::{Deref, DerefMut};
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::key::GenericKey;
use crate::index::btree::page::tree_page::{self, BTreePageHeader, IndexPageType, TREE_PAGE_HEADER_SIZE};

/// Typed view over an internal page: a sorted array of
/// `(key, child page id)` entries after the common header.
///
/// Slot 0's key is a sentinel and never compared; the child at slot i
/// covers keys in `[key_i, key_{i+1})`.
pub struct InternalPage<B, const N: usize> {
    page: B,
}

impl<B, const N: usize> InternalPage<B, N>
where
    B: Deref<Target = Page>,
{
    const ENTRY_SIZE: usize = N + 4;

    pub fn new(page: B) -> Self {
        debug_assert_eq!(tree_page::page_type(&page), Some(IndexPageType::Internal));
        Self { page }
    }

    /// Largest number of children an internal page of this key width can
    /// hold
    pub fn capacity() -> usize {
        (PAGE_SIZE - TREE_PAGE_HEADER_SIZE) / Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        tree_page::size(&self.page)
    }

    pub fn max_size(&self) -> usize {
        tree_page::max_size(&self.page)
    }

    /// Underflow threshold (children) for a non-root internal page
    pub fn min_size(&self) -> usize {
        self.max_size().div_ceil(2)
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

    pub fn key_at(&self, index: usize) -> GenericKey<N> {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index);
        GenericKey::from_bytes(&self.page.data[offset..offset + N])
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index) + N;
        LittleEndian::read_u32(&self.page.data[offset..offset + 4])
    }

    /// Index of the child covering `key`: the largest slot i >= 1 with
    /// `key_i <= key`, else slot 0.
    pub fn lookup_child(&self, key: &GenericKey<N>) -> usize {
        let mut low = 1;
        let mut high = self.size();
        while low < high {
            let mid = (low + high) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Equal => return mid,
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
            }
        }
        low - 1
    }

    /// Slot where a new separator key belongs (keys in slots >= 1 stay
    /// sorted)
    pub fn insert_position(&self, key: &GenericKey<N>) -> usize {
        let mut low = 1;
        let mut high = self.size();
        while low < high {
            let mid = (low + high) / 2;
            if self.key_at(mid) < *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Slot of the entry pointing at `child`
    pub fn index_of_child(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    fn entry_offset(index: usize) -> usize {
        TREE_PAGE_HEADER_SIZE + index * Self::ENTRY_SIZE
    }
}

impl<B, const N: usize> InternalPage<B, N>
where
    B: DerefMut<Target = Page>,
{
    /// Format an empty internal page in place
    pub fn init(page: B, page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        debug_assert!(max_size >= 3 && max_size <= Self::capacity());
        let mut this = Self { page };
        this.page.data.fill(0);
        let header = BTreePageHeader {
            page_type: IndexPageType::Internal,
            size: 0,
            max_size: max_size as u16,
            parent_page_id,
            page_id,
        };
        this.page.data[..TREE_PAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        this
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        tree_page::set_parent_page_id(&mut self.page, parent);
    }

    /// Overwrite the separator key at a slot
    pub fn set_key_at(&mut self, index: usize, key: &GenericKey<N>) {
        debug_assert!(index < self.size());
        let offset = Self::entry_offset(index);
        self.page.data[offset..offset + N].copy_from_slice(key.as_bytes());
    }

    /// Insert an entry, shifting the tail right
    pub fn insert_at(&mut self, index: usize, key: &GenericKey<N>, child: PageId) {
        let size = self.size();
        debug_assert!(index <= size && size < Self::capacity());

        let start = Self::entry_offset(index);
        let end = Self::entry_offset(size);
        self.page.data.copy_within(start..end, start + Self::ENTRY_SIZE);

        self.page.data[start..start + N].copy_from_slice(key.as_bytes());
        LittleEndian::write_u32(&mut self.page.data[start + N..start + N + 4], child);
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
    pub fn move_tail_to<B2>(&mut self, from: usize, other: &mut InternalPage<B2, N>)
    where
        B2: DerefMut<Target = Page>,
    {
        let size = self.size();
        debug_assert!(from <= size);
        let count = size - from;

        let src_start = Self::entry_offset(from);
        let src_end = Self::entry_offset(size);
        let other_size = other.size();
        let dst_start = Self::entry_offset(other_size);
        other.page.data[dst_start..dst_start + (src_end - src_start)]
            .copy_from_slice(&self.page.data[src_start..src_end]);

        tree_page::set_size(&mut other.page, other_size + count);
        tree_page::set_size(&mut self.page, from);
    }
}
