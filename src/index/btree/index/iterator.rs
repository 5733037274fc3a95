use std::sync::Arc;
use log::warn;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::GenericKey;
use crate::index::btree::page::LeafPage;
use crate::storage::buffer::BufferPoolManager;
use super::base::{BPlusTreeIndex, PageReadGuard};

/// Forward iterator over the leaf chain in ascending key order.
///
/// Holds at most one pinned, read-latched leaf. Crossing to the next
/// leaf releases the current one first, so the iterator never stacks
/// latches against writers merging leaves.
pub struct IndexIterator<const N: usize> {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    guard: Option<PageReadGuard>,
    index: usize,
}

impl<const N: usize> IndexIterator<N> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        position: Option<(PageId, PageReadGuard, usize)>,
    ) -> Self {
        match position {
            Some((page_id, guard, index)) => Self {
                buffer_pool,
                page_id,
                guard: Some(guard),
                index,
            },
            None => Self {
                buffer_pool,
                page_id: INVALID_PAGE_ID,
                guard: None,
                index: 0,
            },
        }
    }

    fn release_current(&mut self) {
        if self.guard.take().is_some() {
            if let Err(e) = self.buffer_pool.unpin_page(self.page_id, false) {
                warn!("unpin of iterated leaf {} failed: {}", self.page_id, e);
            }
            self.page_id = INVALID_PAGE_ID;
        }
    }
}

impl<const N: usize> Iterator for IndexIterator<N> {
    type Item = (GenericKey<N>, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entry, next_id) = {
                let guard = self.guard.as_ref()?;
                let view = LeafPage::<_, N>::new(&**guard);
                if self.index < view.size() {
                    (
                        Some((view.key_at(self.index), view.value_at(self.index))),
                        INVALID_PAGE_ID,
                    )
                } else {
                    (None, view.next_page_id())
                }
            };

            if let Some(entry) = entry {
                self.index += 1;
                return Some(entry);
            }

            // Exhausted this leaf: release it, then pin its successor.
            self.release_current();
            if next_id == INVALID_PAGE_ID {
                return None;
            }
            let page = match self.buffer_pool.fetch_page(next_id) {
                Ok(page) => page,
                Err(e) => {
                    warn!("fetch of leaf {} during iteration failed: {}", next_id, e);
                    return None;
                }
            };
            self.guard = Some(page.read_arc());
            self.page_id = next_id;
            self.index = 0;
        }
    }
}

impl<const N: usize> Drop for IndexIterator<N> {
    fn drop(&mut self) {
        self.release_current();
    }
}

impl<const N: usize> BPlusTreeIndex<N> {
    /// Iterate from the smallest key
    pub fn begin(&self) -> Result<IndexIterator<N>, BTreeError> {
        let position = self
            .find_leaf_read(None)?
            .map(|(page_id, guard)| (page_id, guard, 0));
        Ok(IndexIterator::new(self.buffer_pool.clone(), position))
    }

    /// Iterate from the first key >= `key`
    pub fn begin_at(&self, key: &GenericKey<N>) -> Result<IndexIterator<N>, BTreeError> {
        let position = self.find_leaf_read(Some(key))?.map(|(page_id, guard)| {
            let index = {
                let view = LeafPage::<_, N>::new(&*guard);
                match view.lookup(key) {
                    Ok(index) => index,
                    Err(index) => index,
                }
            };
            (page_id, guard, index)
        });
        Ok(IndexIterator::new(self.buffer_pool.clone(), position))
    }

    /// The exhausted iterator
    pub fn end(&self) -> IndexIterator<N> {
        IndexIterator::new(self.buffer_pool.clone(), None)
    }
}
