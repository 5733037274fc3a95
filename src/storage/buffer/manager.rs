use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::container::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Bucket capacity of the page-table directory
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Buffer pool manager: a fixed array of page slots cached over the disk
/// backend, composed with the page-table directory and the LRU-K
/// replacer.
///
/// One process-wide mutex guards all bookkeeping (page table, free list,
/// replacer interaction, pin counts, dirty flags, the page id
/// allocator). The per-page reader-writer latches inside `PagePtr` are
/// orthogonal and belong to higher-layer callers.
pub struct BufferPoolManager {
    pool_size: usize,
    /// Fixed page slots; index = frame id
    pages: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

struct PoolInner {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    free_list: VecDeque<FrameId>,
    frames: Vec<FrameMeta>,
    /// Monotonic page id allocator; page 0 is the header page
    next_page_id: PageId,
}

/// Per-frame bookkeeping, valid only under the pool mutex
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Ok(Self {
            pool_size,
            pages,
            inner: Mutex::new(PoolInner {
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(pool_size, replacer_k),
                free_list,
                frames,
                next_page_id: 1,
            }),
            disk_manager,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id and return a pinned handle to its page.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let frame_id = self.pick_frame(inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }
        inner.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: true,
        };
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((self.pages[frame_id].clone(), page_id))
    }

    /// Return a pinned handle to the page, reading it from disk on miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.record_access(frame_id);
            inner.replacer.set_evictable(frame_id, false);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.pick_frame(inner)?;
        {
            let mut page = self.pages[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }
        inner.frames[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(self.pages[frame_id].clone())
    }

    /// Drop one pin on the page; dirtiness is monotonic until write-back.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut inner.frames[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        meta.is_dirty = meta.is_dirty || is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write the page back to disk (regardless of dirty state) and clear
    /// its dirty flag. The page stays resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let frame_id = inner
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }
        inner.frames[frame_id].is_dirty = false;

        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        for frame_id in 0..self.pool_size {
            if inner.frames[frame_id].page_id == INVALID_PAGE_ID {
                continue;
            }
            {
                let page = self.pages[frame_id].read();
                self.disk_manager.write_page(&page)?;
            }
            inner.frames[frame_id].is_dirty = false;
        }

        Ok(())
    }

    /// Drop the page from the pool and return its frame to the free list.
    ///
    /// Deleting a page nobody has cached succeeds trivially; deleting a
    /// pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let frame_id = match inner.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if inner.frames[frame_id].is_dirty {
            let page = self.pages[frame_id].read();
            self.disk_manager.write_page(&page)?;
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        self.pages[frame_id].write().reset();
        inner.frames[frame_id] = FrameMeta {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        };
        inner.free_list.push_back(frame_id);
        // Deallocation on disk is a placeholder for a free list; ids are
        // never reused.
        debug!("deleted page {} from frame {}", page_id, frame_id);

        Ok(())
    }

    /// Pick a frame for a new resident page: free list first, then the
    /// replacer. An evicted dirty page is written back before reuse.
    ///
    /// Eviction only ever latches unpinned pages, so taking a page latch
    /// here cannot deadlock against callers that hold latches on pinned
    /// pages while re-entering the pool.
    fn pick_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = inner.replacer.evict().ok_or(BufferPoolError::BufferPoolFull)?;
        let meta = &inner.frames[frame_id];
        debug_assert_eq!(meta.pin_count, 0, "evicted a pinned frame");

        if meta.page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                let page = self.pages[frame_id].read();
                if let Err(e) = self.disk_manager.write_page(&page) {
                    warn!("write-back of evicted page {} failed: {}", meta.page_id, e);
                    return Err(e.into());
                }
            }
            inner.page_table.remove(&meta.page_id);
        }

        Ok(frame_id)
    }
}
