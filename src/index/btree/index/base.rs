use std::sync::Arc;
use parking_lot::{ArcRwLockReadGuard, RawRwLock, RwLock};

use crate::common::types::{Page, PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::GenericKey;
use crate::index::btree::page::tree_page::{self, IndexPageType};
use crate::index::btree::page::{InternalPage, LeafPage};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;

pub(crate) type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Disk-resident B+ tree index over the buffer pool.
///
/// Keys are unique fixed-width `GenericKey<N>` values mapping to record
/// ids. Readers descend with latch coupling; writers crab with write
/// latches, releasing ancestors as soon as a visited page cannot split
/// (insert) or underflow (remove). The root pointer has its own
/// reader-writer latch, held only until the root page's latch is taken.
pub struct BPlusTreeIndex<const N: usize> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
}

impl<const N: usize> BPlusTreeIndex<N> {
    /// Open (or register) the index named `name`.
    ///
    /// The root page id is looked up in the header page; a new index
    /// registers an invalid root and starts empty.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let index_name = name.into();
        if leaf_max_size < 2 || leaf_max_size > LeafPage::<&Page, N>::capacity() {
            return Err(BTreeError::PageOverflow(N, leaf_max_size));
        }
        if internal_max_size < 3 || internal_max_size > InternalPage::<&Page, N>::capacity() {
            return Err(BTreeError::PageOverflow(N, internal_max_size));
        }

        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let existing = {
                let page = header.read();
                HeaderPage::get_record(&page, &index_name)
            };
            match existing {
                Some(root) => {
                    buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                    root
                }
                None => {
                    {
                        let mut page = header.write();
                        HeaderPage::insert_record(&mut page, &index_name, INVALID_PAGE_ID)?;
                    }
                    buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Write the in-memory root pointer through to the header page.
    ///
    /// Must be called with the root latch held so the durable record and
    /// the pointer cannot diverge. The header page is flushed so the
    /// update is not lost to a later eviction of a stale copy.
    pub(crate) fn update_root_page_id(&self, root: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            HeaderPage::update_record(&mut page, &self.index_name, root)?;
        }
        // Flush while still pinned so the page cannot be evicted first
        self.buffer_pool.flush_page(HEADER_PAGE_ID)?;
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
        Ok(())
    }

    /// Point lookup: the values for `key`. Keys are unique, so the
    /// result is empty or a single entry.
    pub fn get_value(&self, key: &GenericKey<N>) -> Result<Vec<Rid>, BTreeError> {
        let leaf = match self.find_leaf_read(Some(key))? {
            Some(leaf) => leaf,
            None => return Ok(Vec::new()),
        };
        let (page_id, guard) = leaf;

        let result = {
            let view = LeafPage::<_, N>::new(&*guard);
            match view.lookup(key) {
                Ok(index) => vec![view.value_at(index)],
                Err(_) => Vec::new(),
            }
        };

        drop(guard);
        self.buffer_pool.unpin_page(page_id, false)?;
        Ok(result)
    }

    /// Descend to a leaf with read-latch coupling, releasing each parent
    /// as soon as the child is latched. `key = None` targets the
    /// leftmost leaf. Returns the pinned, read-latched leaf.
    pub(crate) fn find_leaf_read(
        &self,
        key: Option<&GenericKey<N>>,
    ) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page_id = root_id;
        let page = self.buffer_pool.fetch_page(page_id)?;
        let mut guard = page.read_arc();
        drop(root_latch);

        loop {
            match tree_page::page_type(&guard) {
                Some(IndexPageType::Leaf) => return Ok(Some((page_id, guard))),
                Some(IndexPageType::Internal) => {}
                None => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(BTreeError::InvalidPageFormat);
                }
            }

            let child_id = {
                let view = InternalPage::<_, N>::new(&*guard);
                match key {
                    Some(key) => view.child_at(view.lookup_child(key)),
                    None => view.child_at(0),
                }
            };

            let child_page = self.buffer_pool.fetch_page(child_id)?;
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            page_id = child_id;
            guard = child_guard;
        }
    }
}
