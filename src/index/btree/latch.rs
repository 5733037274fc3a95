use log::warn;
use parking_lot::{ArcRwLockWriteGuard, RawRwLock, RwLockWriteGuard};

use crate::common::types::{Page, PageId};
use crate::storage::buffer::BufferPoolManager;

/// Owned write latch on a page, valid independent of the fetch scope
pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// The set of write latches held by one tree operation, in visit order.
///
/// Crabbing appends a page after latching it and releases every held
/// ancestor (root pointer latch first, then pages in FIFO order) once
/// the newly visited page is safe. Each release drops the latch and
/// unpins the page with dirty=true, because the operation is a writer.
/// Pages queued for deletion are deallocated after their latch and pin
/// are gone.
pub(crate) struct WriteSet<'a> {
    buffer_pool: &'a BufferPoolManager,
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    pages: Vec<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
}

impl<'a> WriteSet<'a> {
    pub fn new(buffer_pool: &'a BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            root_guard: None,
            pages: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn set_root_guard(&mut self, guard: RwLockWriteGuard<'a, PageId>) {
        self.root_guard = Some(guard);
    }

    /// Current root page id, readable only while the root latch is held
    pub fn root_page_id(&self) -> Option<PageId> {
        self.root_guard.as_deref().copied()
    }

    pub fn set_root_page_id(&mut self, page_id: PageId) {
        debug_assert!(self.root_guard.is_some(), "root latch not held");
        if let Some(guard) = self.root_guard.as_mut() {
            **guard = page_id;
        }
    }

    /// Latch count (pages only)
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn push(&mut self, page_id: PageId, guard: PageWriteGuard) -> usize {
        self.pages.push((page_id, guard));
        self.pages.len() - 1
    }

    pub fn page_id_at(&self, index: usize) -> PageId {
        self.pages[index].0
    }

    pub fn page_at(&self, index: usize) -> &Page {
        &self.pages[index].1
    }

    pub fn page_mut(&mut self, index: usize) -> &mut Page {
        &mut self.pages[index].1
    }

    /// Mutable access to two distinct latched pages at once
    pub fn page_pair_mut(&mut self, first: usize, second: usize) -> (&mut Page, &mut Page) {
        debug_assert!(first < second);
        let (head, tail) = self.pages.split_at_mut(second);
        (&mut head[first].1, &mut tail[0].1)
    }

    pub fn find(&self, page_id: PageId) -> Option<usize> {
        self.pages.iter().position(|(id, _)| *id == page_id)
    }

    /// Queue a latched page for deallocation at release time
    pub fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Release everything currently held. Called during descent when the
    /// just-latched child is safe (the set then holds only ancestors),
    /// and implicitly when the operation finishes.
    pub fn release_all(&mut self) {
        self.root_guard = None;
        for (page_id, guard) in self.pages.drain(..) {
            drop(guard);
            if let Err(e) = self.buffer_pool.unpin_page(page_id, true) {
                warn!("unpin of latched page {} failed: {}", page_id, e);
            }
        }
        for page_id in self.deleted.drain(..) {
            if let Err(e) = self.buffer_pool.delete_page(page_id) {
                warn!("deallocation of merged page {} failed: {}", page_id, e);
            }
        }
    }
}

impl Drop for WriteSet<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
