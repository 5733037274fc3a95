use log::debug;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::GenericKey;
use crate::index::btree::latch::WriteSet;
use crate::index::btree::page::tree_page::{self, IndexPageType};
use crate::index::btree::page::{InternalPage, LeafPage};
use super::base::BPlusTreeIndex;

impl<const N: usize> BPlusTreeIndex<N> {
    /// Remove a key. Absent keys are ignored.
    pub fn remove(&self, key: &GenericKey<N>) -> Result<(), BTreeError> {
        let mut ctx = WriteSet::new(&self.buffer_pool);
        let root_latch = self.root_page_id.write();
        if *root_latch == INVALID_PAGE_ID {
            return Ok(());
        }
        ctx.set_root_guard(root_latch);

        // Write crabbing: release ancestors once a page cannot underflow.
        let mut page_id = ctx.root_page_id().expect("root latch held");
        let leaf_idx = loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let guard = page.write_arc();
            let (is_leaf, safe) = match tree_page::page_type(&guard) {
                Some(IndexPageType::Leaf) => {
                    let view = LeafPage::<_, N>::new(&*guard);
                    let safe = if view.is_root() {
                        view.size() > 1
                    } else {
                        view.size() > view.min_size()
                    };
                    (true, safe)
                }
                Some(IndexPageType::Internal) => {
                    let view = InternalPage::<_, N>::new(&*guard);
                    let safe = if view.is_root() {
                        view.size() > 2
                    } else {
                        view.size() > view.min_size()
                    };
                    (false, safe)
                }
                None => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(BTreeError::InvalidPageFormat);
                }
            };
            if safe {
                ctx.release_all();
            }
            let idx = ctx.push(page_id, guard);
            if is_leaf {
                break idx;
            }
            page_id = {
                let view = InternalPage::<_, N>::new(ctx.page_at(idx));
                view.child_at(view.lookup_child(key))
            };
        };

        {
            let mut leaf = LeafPage::<_, N>::new(ctx.page_mut(leaf_idx));
            match leaf.lookup(key) {
                Ok(pos) => leaf.remove_at(pos),
                Err(_) => return Ok(()),
            }
        }
        self.coalesce_or_redistribute(&mut ctx, leaf_idx)
    }

    /// Restore the size invariant of the page at `node_idx` after one
    /// entry was removed: root adjustment, redistribution from a
    /// sibling, or a merge that recurses into the parent.
    fn coalesce_or_redistribute(
        &self,
        ctx: &mut WriteSet<'_>,
        node_idx: usize,
    ) -> Result<(), BTreeError> {
        let node_id = ctx.page_id_at(node_idx);

        if tree_page::is_root(ctx.page_at(node_idx)) {
            return self.adjust_root(ctx, node_idx);
        }

        let (is_leaf, size, min_size) = {
            let page = ctx.page_at(node_idx);
            match tree_page::page_type(page).ok_or(BTreeError::InvalidPageFormat)? {
                IndexPageType::Leaf => {
                    let view = LeafPage::<_, N>::new(page);
                    (true, view.size(), view.min_size())
                }
                IndexPageType::Internal => {
                    let view = InternalPage::<_, N>::new(page);
                    (false, view.size(), view.min_size())
                }
            }
        };
        if size >= min_size {
            return Ok(());
        }

        // The parent is the previous page on the latched path; it was
        // retained because this node could underflow.
        let parent_idx = node_idx - 1;
        let (child_index, sibling_index, sibling_id) = {
            let parent = InternalPage::<_, N>::new(ctx.page_at(parent_idx));
            let child_index = parent
                .index_of_child(node_id)
                .expect("node not referenced by its parent");
            let sibling_index = if child_index == 0 { 1 } else { child_index - 1 };
            (child_index, sibling_index, parent.child_at(sibling_index))
        };

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let sib_idx = ctx.push(sibling_id, sibling_page.write_arc());

        let sibling_size = tree_page::size(ctx.page_at(sib_idx));
        let max_size = if is_leaf {
            self.leaf_max_size
        } else {
            self.internal_max_size
        };

        if size + sibling_size > max_size {
            return self.redistribute(ctx, node_idx, sib_idx, parent_idx, child_index, sibling_index);
        }

        // Merge right into left and drop the separator from the parent.
        let (left_idx, right_idx, sep_index) = if sibling_index < child_index {
            (sib_idx, node_idx, child_index)
        } else {
            (node_idx, sib_idx, sibling_index)
        };
        self.merge(ctx, left_idx, right_idx, parent_idx, sep_index, is_leaf)?;
        self.coalesce_or_redistribute(ctx, parent_idx)
    }

    /// Move one entry from the sibling and fix the separator key in the
    /// parent.
    fn redistribute(
        &self,
        ctx: &mut WriteSet<'_>,
        node_idx: usize,
        sib_idx: usize,
        parent_idx: usize,
        child_index: usize,
        sibling_index: usize,
    ) -> Result<(), BTreeError> {
        let node_id = ctx.page_id_at(node_idx);
        let sibling_is_left = sibling_index < child_index;
        let is_leaf = tree_page::page_type(ctx.page_at(node_idx)) == Some(IndexPageType::Leaf);

        if is_leaf {
            let (sep_slot, new_sep) = {
                let (node_page, sib_page) = ctx.page_pair_mut(node_idx, sib_idx);
                let mut node = LeafPage::<_, N>::new(&mut *node_page);
                let mut sib = LeafPage::<_, N>::new(&mut *sib_page);
                if sibling_is_left {
                    let last = sib.size() - 1;
                    let (k, v) = (sib.key_at(last), sib.value_at(last));
                    sib.remove_at(last);
                    node.insert_at(0, &k, v);
                    (child_index, node.key_at(0))
                } else {
                    let (k, v) = (sib.key_at(0), sib.value_at(0));
                    sib.remove_at(0);
                    let size = node.size();
                    node.insert_at(size, &k, v);
                    (sibling_index, sib.key_at(0))
                }
            };
            let mut parent = InternalPage::<_, N>::new(ctx.page_mut(parent_idx));
            parent.set_key_at(sep_slot, &new_sep);
            return Ok(());
        }

        // Internal pages rotate the moved key through the parent.
        let sep_slot = if sibling_is_left { child_index } else { sibling_index };
        let sep_key = {
            let parent = InternalPage::<_, N>::new(ctx.page_at(parent_idx));
            parent.key_at(sep_slot)
        };
        let (up_key, moved_child) = {
            let (node_page, sib_page) = ctx.page_pair_mut(node_idx, sib_idx);
            let mut node = InternalPage::<_, N>::new(&mut *node_page);
            let mut sib = InternalPage::<_, N>::new(&mut *sib_page);
            if sibling_is_left {
                let last = sib.size() - 1;
                let moved_child = sib.child_at(last);
                let up_key = sib.key_at(last);
                sib.remove_at(last);
                node.insert_at(0, &sep_key, moved_child);
                node.set_key_at(1, &sep_key);
                (up_key, moved_child)
            } else {
                let moved_child = sib.child_at(0);
                let up_key = sib.key_at(1);
                sib.remove_at(0);
                let size = node.size();
                node.insert_at(size, &sep_key, moved_child);
                (up_key, moved_child)
            }
        };
        {
            let mut parent = InternalPage::<_, N>::new(ctx.page_mut(parent_idx));
            parent.set_key_at(sep_slot, &up_key);
        }
        self.reparent(ctx, moved_child, node_id)
    }

    /// Merge the right page into the left one and remove the separator
    /// entry from the parent. The right page is queued for deallocation.
    fn merge(
        &self,
        ctx: &mut WriteSet<'_>,
        left_idx: usize,
        right_idx: usize,
        parent_idx: usize,
        sep_index: usize,
        is_leaf: bool,
    ) -> Result<(), BTreeError> {
        let left_id = ctx.page_id_at(left_idx);
        let right_id = ctx.page_id_at(right_idx);
        let sep_key = {
            let parent = InternalPage::<_, N>::new(ctx.page_at(parent_idx));
            parent.key_at(sep_index)
        };

        let moved_children = {
            let (lo, hi, swapped) = if left_idx < right_idx {
                (left_idx, right_idx, false)
            } else {
                (right_idx, left_idx, true)
            };
            let (lo_page, hi_page) = ctx.page_pair_mut(lo, hi);
            let (left_page, right_page) = if swapped {
                (hi_page, lo_page)
            } else {
                (lo_page, hi_page)
            };

            if is_leaf {
                let mut left = LeafPage::<_, N>::new(left_page);
                let mut right = LeafPage::<_, N>::new(right_page);
                let right_next = right.next_page_id();
                right.move_tail_to(0, &mut left);
                left.set_next_page_id(right_next);
                Vec::new()
            } else {
                let mut left = InternalPage::<_, N>::new(left_page);
                let right = InternalPage::<_, N>::new(&*right_page);
                let mut moved = Vec::with_capacity(right.size());
                for i in 0..right.size() {
                    let key = if i == 0 { sep_key } else { right.key_at(i) };
                    let child = right.child_at(i);
                    let size = left.size();
                    left.insert_at(size, &key, child);
                    moved.push(child);
                }
                moved
            }
        };

        for child_id in moved_children {
            self.reparent(ctx, child_id, left_id)?;
        }

        debug!("merged page {} into {}", right_id, left_id);
        ctx.mark_deleted(right_id);
        {
            let mut parent = InternalPage::<_, N>::new(ctx.page_mut(parent_idx));
            parent.remove_at(sep_index);
        }
        Ok(())
    }

    /// Shrink the root: promote a single remaining child, or mark the
    /// tree empty when the root leaf has no entries left.
    fn adjust_root(&self, ctx: &mut WriteSet<'_>, root_idx: usize) -> Result<(), BTreeError> {
        let root_id = ctx.page_id_at(root_idx);
        let page_type =
            tree_page::page_type(ctx.page_at(root_idx)).ok_or(BTreeError::InvalidPageFormat)?;

        match page_type {
            IndexPageType::Internal => {
                let only_child = {
                    let view = InternalPage::<_, N>::new(ctx.page_at(root_idx));
                    if view.size() == 1 {
                        Some(view.child_at(0))
                    } else {
                        None
                    }
                };
                if let Some(child_id) = only_child {
                    self.reparent(ctx, child_id, INVALID_PAGE_ID)?;
                    ctx.set_root_page_id(child_id);
                    self.update_root_page_id(child_id)?;
                    ctx.mark_deleted(root_id);
                    debug!("promoted page {} to root", child_id);
                }
            }
            IndexPageType::Leaf => {
                let empty = LeafPage::<_, N>::new(ctx.page_at(root_idx)).size() == 0;
                if empty {
                    ctx.set_root_page_id(INVALID_PAGE_ID);
                    self.update_root_page_id(INVALID_PAGE_ID)?;
                    ctx.mark_deleted(root_id);
                    debug!("tree is now empty");
                }
            }
        }
        Ok(())
    }
}
