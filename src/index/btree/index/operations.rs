use parking_lot::RwLockWriteGuard;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::GenericKey;
use crate::index::btree::latch::WriteSet;
use crate::index::btree::page::tree_page::{self, IndexPageType};
use crate::index::btree::page::{InternalPage, LeafPage};
use super::base::BPlusTreeIndex;

impl<const N: usize> BPlusTreeIndex<N> {
    /// Insert a key-value pair. Returns false if the key already exists
    /// (the index is unique).
    pub fn insert(&self, key: &GenericKey<N>, rid: Rid) -> Result<bool, BTreeError> {
        let mut ctx = WriteSet::new(&self.buffer_pool);
        let root_latch = self.root_page_id.write();
        if *root_latch == INVALID_PAGE_ID {
            return self.start_new_tree(root_latch, key, rid);
        }
        ctx.set_root_guard(root_latch);

        // Write crabbing: latch down, release ancestors once a page is
        // safe for insert.
        let mut page_id = ctx.root_page_id().expect("root latch held");
        let leaf_idx = loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let guard = page.write_arc();
            let (is_leaf, safe) = match tree_page::page_type(&guard) {
                Some(IndexPageType::Leaf) => {
                    let view = LeafPage::<_, N>::new(&*guard);
                    (true, view.size() + 1 < view.max_size())
                }
                Some(IndexPageType::Internal) => {
                    let view = InternalPage::<_, N>::new(&*guard);
                    (false, view.size() < view.max_size())
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

        let split_needed = {
            let mut leaf = LeafPage::<_, N>::new(ctx.page_mut(leaf_idx));
            match leaf.lookup(key) {
                Ok(_) => return Ok(false),
                Err(pos) => leaf.insert_at(pos, key, rid),
            }
            leaf.size() == leaf.max_size()
        };
        if !split_needed {
            return Ok(true);
        }

        // Split the leaf: keep the lower half, link the new right leaf
        // into the chain, push its smallest key up.
        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        let new_idx = ctx.push(new_page_id, new_page.write_arc());
        let sep_key = {
            let (left_page, right_page) = ctx.page_pair_mut(leaf_idx, new_idx);
            let mut left = LeafPage::<_, N>::new(&mut *left_page);
            let mut right = LeafPage::<_, N>::init(
                &mut *right_page,
                new_page_id,
                left.parent_page_id(),
                self.leaf_max_size,
            );
            let split_at = left.size().div_ceil(2);
            left.move_tail_to(split_at, &mut right);
            right.set_next_page_id(left.next_page_id());
            left.set_next_page_id(new_page_id);
            right.key_at(0)
        };
        self.insert_in_parent(&mut ctx, leaf_idx, sep_key, new_idx)?;
        Ok(true)
    }

    /// First insert: materialize a single-leaf tree under the held root
    /// pointer latch.
    fn start_new_tree(
        &self,
        mut root_latch: RwLockWriteGuard<'_, PageId>,
        key: &GenericKey<N>,
        rid: Rid,
    ) -> Result<bool, BTreeError> {
        let (page, page_id) = self.buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            let mut leaf =
                LeafPage::<_, N>::init(&mut *guard, page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert_at(0, key, rid);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        *root_latch = page_id;
        self.update_root_page_id(page_id)?;
        Ok(true)
    }

    /// Propagate a split: hang `(sep_key, right)` off the parent of
    /// `left`, splitting upward as needed. Both pages are latched in the
    /// write set; so is every ancestor that may still change.
    fn insert_in_parent(
        &self,
        ctx: &mut WriteSet<'_>,
        left_idx: usize,
        sep_key: GenericKey<N>,
        right_idx: usize,
    ) -> Result<(), BTreeError> {
        let mut left_idx = left_idx;
        let mut right_idx = right_idx;
        let mut sep_key = sep_key;

        loop {
            let left_id = ctx.page_id_at(left_idx);
            let right_id = ctx.page_id_at(right_idx);

            if ctx.root_page_id() == Some(left_id) {
                // The split reached the root: grow a fresh internal root
                // whose slot 0 is the sentinel entry for the left page.
                let (root_page, root_id) = self.buffer_pool.new_page()?;
                {
                    let mut guard = root_page.write();
                    let mut root = InternalPage::<_, N>::init(
                        &mut *guard,
                        root_id,
                        INVALID_PAGE_ID,
                        self.internal_max_size,
                    );
                    root.insert_at(0, &GenericKey::from_bytes(&[]), left_id);
                    root.insert_at(1, &sep_key, right_id);
                }
                self.buffer_pool.unpin_page(root_id, true)?;
                tree_page::set_parent_page_id(ctx.page_mut(left_idx), root_id);
                tree_page::set_parent_page_id(ctx.page_mut(right_idx), root_id);
                ctx.set_root_page_id(root_id);
                self.update_root_page_id(root_id)?;
                return Ok(());
            }

            let parent_idx = left_idx - 1;
            let parent_id = ctx.page_id_at(parent_idx);

            let has_room = {
                let parent = InternalPage::<_, N>::new(ctx.page_at(parent_idx));
                parent.size() < parent.max_size()
            };
            if has_room {
                {
                    let mut parent = InternalPage::<_, N>::new(ctx.page_mut(parent_idx));
                    let pos = parent.insert_position(&sep_key);
                    parent.insert_at(pos, &sep_key, right_id);
                }
                tree_page::set_parent_page_id(ctx.page_mut(right_idx), parent_id);
                return Ok(());
            }

            // Split the parent: materialize the pre-insert entries plus
            // the new pair in key order, halve, lift the right half's
            // slot-0 key.
            let (new_page, new_page_id) = self.buffer_pool.new_page()?;
            let new_idx = ctx.push(new_page_id, new_page.write_arc());

            let (lifted_key, moved_children) = {
                let (parent_page, new_parent_page) = ctx.page_pair_mut(parent_idx, new_idx);
                let parent = InternalPage::<_, N>::new(&mut *parent_page);
                let parent_parent = parent.parent_page_id();

                let mut entries: Vec<(GenericKey<N>, PageId)> = (0..parent.size())
                    .map(|i| (parent.key_at(i), parent.child_at(i)))
                    .collect();
                let pos = parent.insert_position(&sep_key);
                entries.insert(pos, (sep_key, right_id));
                let left_count = entries.len() / 2;

                let mut parent = InternalPage::<_, N>::init(
                    &mut *parent_page,
                    parent_id,
                    parent_parent,
                    self.internal_max_size,
                );
                for (i, (k, c)) in entries[..left_count].iter().enumerate() {
                    parent.insert_at(i, k, *c);
                }
                let mut new_parent = InternalPage::<_, N>::init(
                    &mut *new_parent_page,
                    new_page_id,
                    parent_parent,
                    self.internal_max_size,
                );
                for (i, (k, c)) in entries[left_count..].iter().enumerate() {
                    new_parent.insert_at(i, k, *c);
                }

                let moved: Vec<PageId> = entries[left_count..].iter().map(|(_, c)| *c).collect();
                (entries[left_count].0, moved)
            };

            for child_id in moved_children {
                self.reparent(ctx, child_id, new_page_id)?;
            }

            sep_key = lifted_key;
            left_idx = parent_idx;
            right_idx = new_idx;
        }
    }

    /// Point a child's parent pointer at `new_parent`, through the write
    /// set when the child is already latched there.
    pub(crate) fn reparent(
        &self,
        ctx: &mut WriteSet<'_>,
        child_id: PageId,
        new_parent: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(idx) = ctx.find(child_id) {
            tree_page::set_parent_page_id(ctx.page_mut(idx), new_parent);
            return Ok(());
        }
        let page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut guard = page.write();
            tree_page::set_parent_page_id(&mut guard, new_parent);
        }
        self.buffer_pool.unpin_page(child_id, true)?;
        Ok(())
    }
}
