use std::sync::Arc;

use tracing::debug;

use crate::buffer::{BufferPoolManager, Page};
use crate::common::{PageId, RecordId, Result, StrataError, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::page::{
    BTreePage, BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage,
    LeafPageRef,
};

use super::IndexIterator;

enum InsertOutcome {
    Duplicate,
    Done,
    Split { parent: PageId },
}

/// A B+Tree index over buffer-pool pages: unique u32 keys mapped to
/// RecordIds, stored in fixed-size leaf and internal node pages.
///
/// Traversal pins each visited page through the buffer pool and unpins it
/// before the method returns; pages are referenced by id only, never by
/// pointer. Every change to the root is mirrored into the header page under
/// the index's name. The tree assumes a single mutator.
pub struct BPlusTree {
    index_name: String,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Creates an empty tree. No pages are allocated until the first
    /// insert.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            root_page_id: INVALID_PAGE_ID,
            bpm,
            leaf_max_size,
            internal_max_size,
        }
    }

    /// Reopens a tree by looking up its root in the header page. A name
    /// with no record yields an empty tree.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let header = bpm.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let data = header.read_data();
            HeaderPageRef::new(&data[..])
                .get_root_id(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };
        bpm.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            index_name,
            root_page_id,
            bpm,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Point lookup.
    pub fn get(&self, key: u32) -> Result<Option<RecordId>> {
        if self.is_empty() {
            return Ok(None);
        }
        let leaf_page_id = self.find_leaf(key)?;
        let leaf = self.bpm.fetch_page(leaf_page_id)?;
        let result = {
            let data = leaf.read_data();
            LeafPageRef::new(&data[..]).lookup(key)
        };
        self.bpm.unpin_page(leaf_page_id, false);
        Ok(result)
    }

    /// Inserts `(key, value)`. Returns false and leaves the tree unchanged
    /// if the key already exists.
    pub fn insert(&mut self, key: u32, value: RecordId) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }

        let leaf_page_id = self.find_leaf(key)?;
        let leaf = self.bpm.fetch_page(leaf_page_id)?;
        let outcome = {
            let mut data = leaf.write_data();
            let mut node = LeafPage::new(&mut data[..]);
            let old_size = node.size();
            let new_size = node.insert(key, value);
            if new_size == old_size {
                InsertOutcome::Duplicate
            } else if new_size <= node.max_size() {
                InsertOutcome::Done
            } else {
                InsertOutcome::Split {
                    parent: node.parent_page_id(),
                }
            }
        };

        match outcome {
            InsertOutcome::Duplicate => {
                self.bpm.unpin_page(leaf_page_id, false);
                Ok(false)
            }
            InsertOutcome::Done => {
                self.bpm.unpin_page(leaf_page_id, true);
                Ok(true)
            }
            InsertOutcome::Split { parent } => {
                self.split_leaf(leaf_page_id, &leaf, parent)?;
                self.bpm.unpin_page(leaf_page_id, true);
                Ok(true)
            }
        }
    }

    /// Removes `key` if present, rebalancing underflowing nodes by
    /// redistribution or merge.
    pub fn remove(&mut self, key: u32) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let leaf_page_id = self.find_leaf(key)?;
        let leaf = self.bpm.fetch_page(leaf_page_id)?;
        let (removed, size, min_size, parent) = {
            let mut data = leaf.write_data();
            let mut node = LeafPage::new(&mut data[..]);
            let removed = node.remove(key);
            (removed, node.size(), node.min_size(), node.parent_page_id())
        };

        if !removed {
            self.bpm.unpin_page(leaf_page_id, false);
            return Ok(());
        }
        self.bpm.unpin_page(leaf_page_id, true);

        // A root leaf may shrink freely.
        if leaf_page_id == self.root_page_id || size >= min_size {
            return Ok(());
        }
        self.redistribute_or_merge(leaf_page_id, parent)
    }

    /// Iterator over all entries in ascending key order.
    pub fn begin(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm)));
        }
        let leaf_page_id = self.find_leftmost_leaf()?;
        let leaf = self.bpm.fetch_page(leaf_page_id)?;
        Ok(IndexIterator::from_parts(
            Arc::clone(&self.bpm),
            leaf,
            leaf_page_id,
            0,
        ))
    }

    /// Iterator positioned at the smallest entry >= `key`.
    pub fn begin_at(&self, key: u32) -> Result<IndexIterator> {
        if self.is_empty() {
            return Ok(IndexIterator::end(Arc::clone(&self.bpm)));
        }
        let leaf_page_id = self.find_leaf(key)?;
        let leaf = self.bpm.fetch_page(leaf_page_id)?;
        let index = {
            let data = leaf.read_data();
            LeafPageRef::new(&data[..]).key_index(key)
        };
        Ok(IndexIterator::from_parts(
            Arc::clone(&self.bpm),
            leaf,
            leaf_page_id,
            index,
        ))
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Root-to-leaf descent: at each internal page follow the child whose
    /// key range covers `key`. Each visited page is pinned for the duration
    /// of its inspection only.
    fn find_leaf(&self, key: u32) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let page = self.bpm.fetch_page(current)?;
            let next = {
                let data = page.read_data();
                let view = BTreePageRef::new(&data[..]);
                if view.is_leaf() {
                    None
                } else {
                    Some(InternalPageRef::new(&data[..]).lookup(key))
                }
            };
            self.bpm.unpin_page(current, false);
            match next {
                None => return Ok(current),
                Some(child) => current = child,
            }
        }
    }

    fn find_leftmost_leaf(&self) -> Result<PageId> {
        let mut current = self.root_page_id;
        loop {
            let page = self.bpm.fetch_page(current)?;
            let next = {
                let data = page.read_data();
                let view = BTreePageRef::new(&data[..]);
                if view.is_leaf() {
                    None
                } else {
                    Some(InternalPageRef::new(&data[..]).child_at(0))
                }
            };
            self.bpm.unpin_page(current, false);
            match next {
                None => return Ok(current),
                Some(child) => current = child,
            }
        }
    }

    fn start_new_tree(&mut self, key: u32, value: RecordId) -> Result<()> {
        let (root_page_id, page) = self.bpm.new_page()?;
        {
            let mut data = page.write_data();
            let mut leaf = LeafPage::new(&mut data[..]);
            leaf.init(root_page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value);
        }
        self.bpm.unpin_page(root_page_id, true);

        self.root_page_id = root_page_id;
        self.update_root_page_id(true)?;
        debug!("started new tree with root {}", root_page_id);
        Ok(())
    }

    /// Splits an over-full leaf: the upper half moves to a fresh sibling,
    /// the chain is re-threaded, and the sibling's first key goes up.
    fn split_leaf(
        &mut self,
        leaf_page_id: PageId,
        leaf: &Arc<Page>,
        parent: PageId,
    ) -> Result<()> {
        let (new_leaf_id, new_page) = self.bpm.new_page()?;
        let split_key = {
            let mut old_data = leaf.write_data();
            let mut new_data = new_page.write_data();
            let mut old_node = LeafPage::new(&mut old_data[..]);
            let mut new_node = LeafPage::new(&mut new_data[..]);

            new_node.init(new_leaf_id, parent, self.leaf_max_size);
            old_node.move_half_to(&mut new_node);
            new_node.set_next_page_id(old_node.next_page_id());
            old_node.set_next_page_id(new_leaf_id);
            new_node.key_at(0)
        };
        debug!(
            "split leaf {} into {} at key {}",
            leaf_page_id, new_leaf_id, split_key
        );

        self.insert_into_parent(leaf_page_id, parent, new_leaf_id, split_key)?;
        self.bpm.unpin_page(new_leaf_id, true);
        Ok(())
    }

    /// Links a freshly split-off page into the tree above `old_page_id`,
    /// splitting ancestors as needed and growing a new root at the top.
    fn insert_into_parent(
        &mut self,
        old_page_id: PageId,
        parent: PageId,
        new_page_id: PageId,
        key: u32,
    ) -> Result<()> {
        if old_page_id == self.root_page_id {
            let (root_page_id, root_page) = self.bpm.new_page()?;
            {
                let mut data = root_page.write_data();
                let mut root = InternalPage::new(&mut data[..]);
                root.init(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_page_id, key, new_page_id);
            }
            self.bpm.unpin_page(root_page_id, true);

            self.set_parent(old_page_id, root_page_id)?;
            self.set_parent(new_page_id, root_page_id)?;
            self.root_page_id = root_page_id;
            self.update_root_page_id(false)?;
            debug!("grew new root {}", root_page_id);
            return Ok(());
        }

        let parent_page = self.bpm.fetch_page(parent)?;
        let overflow = {
            let mut data = parent_page.write_data();
            let mut node = InternalPage::new(&mut data[..]);
            node.insert_node_after(old_page_id, key, new_page_id);
            node.size() > node.max_size()
        };
        if !overflow {
            self.bpm.unpin_page(parent, true);
            return Ok(());
        }

        // The parent overflowed by one; split it with the same min-size
        // policy as leaves and push its separator further up.
        let (new_internal_id, new_internal) = self.bpm.new_page()?;
        let (pushed_key, grand_parent, moved_children) = {
            let mut old_data = parent_page.write_data();
            let mut new_data = new_internal.write_data();
            let mut old_node = InternalPage::new(&mut old_data[..]);
            let mut new_node = InternalPage::new(&mut new_data[..]);

            new_node.init(
                new_internal_id,
                old_node.parent_page_id(),
                self.internal_max_size,
            );
            old_node.move_half_to(&mut new_node);

            let moved: Vec<PageId> = (0..new_node.size()).map(|i| new_node.child_at(i)).collect();
            (new_node.split_key(), old_node.parent_page_id(), moved)
        };
        debug!(
            "split internal {} into {} at key {}",
            parent, new_internal_id, pushed_key
        );
        for child in moved_children {
            self.set_parent(child, new_internal_id)?;
        }

        self.insert_into_parent(parent, grand_parent, new_internal_id, pushed_key)?;
        self.bpm.unpin_page(parent, true);
        self.bpm.unpin_page(new_internal_id, true);
        Ok(())
    }

    /// Fixes an underflowing non-root node: borrow one entry from a sibling
    /// that can spare it, otherwise merge with a sibling and recurse on the
    /// parent.
    fn redistribute_or_merge(&mut self, page_id: PageId, parent_id: PageId) -> Result<()> {
        let parent = self.bpm.fetch_page(parent_id)?;
        let (index, left_id, right_id) = {
            let data = parent.read_data();
            let node = InternalPageRef::new(&data[..]);
            let index = node
                .child_index(page_id)
                .expect("underflowing page missing from its parent");
            let left = (index > 0).then(|| node.child_at(index - 1));
            let right = (index + 1 < node.size()).then(|| node.child_at(index + 1));
            (index, left, right)
        };

        let page = self.bpm.fetch_page(page_id)?;
        let is_leaf = {
            let data = page.read_data();
            BTreePageRef::new(&data[..]).is_leaf()
        };

        // A leaf sibling may donate down to one entry below min_size (the
        // next removal through it merges); an internal sibling donates only
        // above min_size so no internal node is ever left with one child.
        let can_spare = |page: &Arc<Page>| {
            let data = page.read_data();
            let view = BTreePageRef::new(&data[..]);
            if is_leaf {
                view.size() >= view.min_size()
            } else {
                view.size() > view.min_size()
            }
        };

        if let Some(left_id) = left_id {
            let left = self.bpm.fetch_page(left_id)?;
            if can_spare(&left) {
                let moved_child = if is_leaf {
                    self.redistribute_leaf_from_left(&left, &page, &parent, index);
                    None
                } else {
                    Some(self.redistribute_internal_from_left(&left, &page, &parent, index))
                };
                self.bpm.unpin_page(left_id, true);
                self.bpm.unpin_page(page_id, true);
                self.bpm.unpin_page(parent_id, true);
                if let Some(child) = moved_child {
                    self.set_parent(child, page_id)?;
                }
                return Ok(());
            }
            self.bpm.unpin_page(left_id, false);
        }

        if let Some(right_id) = right_id {
            let right = self.bpm.fetch_page(right_id)?;
            if can_spare(&right) {
                let moved_child = if is_leaf {
                    self.redistribute_leaf_from_right(&right, &page, &parent, index);
                    None
                } else {
                    Some(self.redistribute_internal_from_right(&right, &page, &parent, index))
                };
                self.bpm.unpin_page(right_id, true);
                self.bpm.unpin_page(page_id, true);
                self.bpm.unpin_page(parent_id, true);
                if let Some(child) = moved_child {
                    self.set_parent(child, page_id)?;
                }
                return Ok(());
            }
            self.bpm.unpin_page(right_id, false);
        }

        // Neither sibling can spare an entry: merge. Prefer folding into
        // the left sibling; the leftmost child folds its right sibling in.
        let parent_size;
        let parent_min;
        let grand_parent;
        if let Some(left_id) = left_id {
            let left = self.bpm.fetch_page(left_id)?;
            let moved_children = {
                let mut left_data = left.write_data();
                let mut page_data = page.write_data();
                let mut parent_data = parent.write_data();
                let mut parent_node = InternalPage::new(&mut parent_data[..]);

                let moved = if is_leaf {
                    let mut left_node = LeafPage::new(&mut left_data[..]);
                    let mut page_node = LeafPage::new(&mut page_data[..]);
                    page_node.move_all_to(&mut left_node);
                    Vec::new()
                } else {
                    let mut left_node = InternalPage::new(&mut left_data[..]);
                    let page_node = InternalPageRef::new(&page_data[..]);
                    let separator = parent_node.key_at(index);
                    left_node.append(separator, page_node.child_at(0));
                    for i in 1..page_node.size() {
                        left_node.append(page_node.key_at(i), page_node.child_at(i));
                    }
                    (0..page_node.size()).map(|i| page_node.child_at(i)).collect()
                };
                parent_node.remove_at(index);
                parent_size = parent_node.size();
                parent_min = parent_node.min_size();
                grand_parent = parent_node.parent_page_id();
                moved
            };
            debug!("merged page {} into left sibling {}", page_id, left_id);
            for child in moved_children {
                self.set_parent(child, left_id)?;
            }
            self.bpm.unpin_page(left_id, true);
            self.bpm.unpin_page(page_id, false);
            self.bpm.delete_page(page_id)?;
        } else {
            let right_id = right_id.expect("non-root node has no siblings");
            let right = self.bpm.fetch_page(right_id)?;
            let moved_children = {
                let mut right_data = right.write_data();
                let mut page_data = page.write_data();
                let mut parent_data = parent.write_data();
                let mut parent_node = InternalPage::new(&mut parent_data[..]);

                let moved = if is_leaf {
                    let mut right_node = LeafPage::new(&mut right_data[..]);
                    let mut page_node = LeafPage::new(&mut page_data[..]);
                    right_node.move_all_to(&mut page_node);
                    Vec::new()
                } else {
                    let mut page_node = InternalPage::new(&mut page_data[..]);
                    let right_node = InternalPageRef::new(&right_data[..]);
                    let separator = parent_node.key_at(index + 1);
                    page_node.append(separator, right_node.child_at(0));
                    for i in 1..right_node.size() {
                        page_node.append(right_node.key_at(i), right_node.child_at(i));
                    }
                    (0..right_node.size())
                        .map(|i| right_node.child_at(i))
                        .collect()
                };
                parent_node.remove_at(index + 1);
                parent_size = parent_node.size();
                parent_min = parent_node.min_size();
                grand_parent = parent_node.parent_page_id();
                moved
            };
            debug!("merged right sibling {} into page {}", right_id, page_id);
            for child in moved_children {
                self.set_parent(child, page_id)?;
            }
            self.bpm.unpin_page(page_id, true);
            self.bpm.unpin_page(right_id, false);
            self.bpm.delete_page(right_id)?;
        }
        self.bpm.unpin_page(parent_id, true);

        if parent_id == self.root_page_id {
            if parent_size == 1 {
                self.collapse_root()?;
            }
        } else if parent_size < parent_min {
            self.redistribute_or_merge(parent_id, grand_parent)?;
        }
        Ok(())
    }

    /// Borrow the left sibling's last entry; the parent separator becomes
    /// the target's new first key.
    fn redistribute_leaf_from_left(
        &self,
        left: &Arc<Page>,
        page: &Arc<Page>,
        parent: &Arc<Page>,
        index: usize,
    ) {
        let mut left_data = left.write_data();
        let mut page_data = page.write_data();
        let mut parent_data = parent.write_data();
        let mut left_node = LeafPage::new(&mut left_data[..]);
        let mut page_node = LeafPage::new(&mut page_data[..]);
        let mut parent_node = InternalPage::new(&mut parent_data[..]);

        let (key, value) = left_node.item_at(left_node.size() - 1);
        left_node.remove_at(left_node.size() - 1);
        page_node.insert(key, value);
        parent_node.set_key_at(index, key);
    }

    /// Borrow the right sibling's first entry; the parent separator after
    /// the target becomes the right sibling's new first key.
    fn redistribute_leaf_from_right(
        &self,
        right: &Arc<Page>,
        page: &Arc<Page>,
        parent: &Arc<Page>,
        index: usize,
    ) {
        let mut right_data = right.write_data();
        let mut page_data = page.write_data();
        let mut parent_data = parent.write_data();
        let mut right_node = LeafPage::new(&mut right_data[..]);
        let mut page_node = LeafPage::new(&mut page_data[..]);
        let mut parent_node = InternalPage::new(&mut parent_data[..]);

        let (key, value) = right_node.item_at(0);
        right_node.remove_at(0);
        page_node.insert(key, value);
        parent_node.set_key_at(index + 1, right_node.key_at(0));
    }

    /// Borrow the left internal sibling's last (key, child) cell. The old
    /// parent separator keys the target's former first child and the moved
    /// key becomes the new separator. Returns the moved child so the caller
    /// can repoint its parent.
    fn redistribute_internal_from_left(
        &self,
        left: &Arc<Page>,
        page: &Arc<Page>,
        parent: &Arc<Page>,
        index: usize,
    ) -> PageId {
        let mut left_data = left.write_data();
        let mut page_data = page.write_data();
        let mut parent_data = parent.write_data();
        let mut left_node = InternalPage::new(&mut left_data[..]);
        let mut page_node = InternalPage::new(&mut page_data[..]);
        let mut parent_node = InternalPage::new(&mut parent_data[..]);

        let last = left_node.size() - 1;
        let moved_key = left_node.key_at(last);
        let moved_child = left_node.child_at(last);
        let old_separator = parent_node.key_at(index);

        page_node.push_front(moved_child, old_separator);
        left_node.remove_at(last);
        parent_node.set_key_at(index, moved_key);
        moved_child
    }

    /// Borrow the right internal sibling's first child under the old parent
    /// separator; the right sibling's key[1] becomes the new separator.
    fn redistribute_internal_from_right(
        &self,
        right: &Arc<Page>,
        page: &Arc<Page>,
        parent: &Arc<Page>,
        index: usize,
    ) -> PageId {
        let mut right_data = right.write_data();
        let mut page_data = page.write_data();
        let mut parent_data = parent.write_data();
        let mut right_node = InternalPage::new(&mut right_data[..]);
        let mut page_node = InternalPage::new(&mut page_data[..]);
        let mut parent_node = InternalPage::new(&mut parent_data[..]);

        let moved_child = right_node.child_at(0);
        let old_separator = parent_node.key_at(index + 1);

        page_node.append(old_separator, moved_child);
        parent_node.set_key_at(index + 1, right_node.key_at(1));
        right_node.remove_at(0);
        moved_child
    }

    /// Replaces a single-child root with that child.
    fn collapse_root(&mut self) -> Result<()> {
        let old_root_id = self.root_page_id;
        let root = self.bpm.fetch_page(old_root_id)?;
        let child_id = {
            let data = root.read_data();
            InternalPageRef::new(&data[..]).child_at(0)
        };
        self.bpm.unpin_page(old_root_id, false);
        self.bpm.delete_page(old_root_id)?;

        self.set_parent(child_id, INVALID_PAGE_ID)?;
        self.root_page_id = child_id;
        self.update_root_page_id(false)?;
        debug!("collapsed root {} into {}", old_root_id, child_id);
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent: PageId) -> Result<()> {
        let page = self.bpm.fetch_page(page_id)?;
        {
            let mut data = page.write_data();
            BTreePage::new(&mut data[..]).set_parent_page_id(parent);
        }
        self.bpm.unpin_page(page_id, true);
        Ok(())
    }

    /// Mirrors the current root page id into the header page; `insert` adds
    /// a fresh record the first time the index gets a root.
    fn update_root_page_id(&self, insert: bool) -> Result<()> {
        let header = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        let ok = {
            let mut data = header.write_data();
            let mut page = HeaderPage::new(&mut data[..]);
            if insert && page.get_root_id(&self.index_name).is_none() {
                page.insert_record(&self.index_name, self.root_page_id)
            } else {
                page.update_record(&self.index_name, self.root_page_id)
                    || page.insert_record(&self.index_name, self.root_page_id)
            }
        };
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        if !ok {
            return Err(StrataError::HeaderPageFull);
        }
        Ok(())
    }
}
