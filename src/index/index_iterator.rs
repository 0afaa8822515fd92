use std::sync::Arc;

use crate::buffer::{BufferPoolManager, Page};
use crate::common::{PageId, RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::LeafPageRef;

/// Forward iterator over the leaf chain of a B+Tree.
///
/// The iterator pins exactly one leaf at a time: the pin is dropped when it
/// advances past the leaf's last entry (fetching the next sibling) and when
/// the iterator itself is dropped.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<Arc<Page>>,
    leaf_page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn from_parts(
        bpm: Arc<BufferPoolManager>,
        leaf: Arc<Page>,
        leaf_page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            leaf_page_id,
            index,
        }
    }

    /// The past-the-end iterator, holding no pin.
    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            leaf_page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Yields the next entry in key order, or None past the last leaf.
    pub fn next_entry(&mut self) -> Result<Option<(u32, RecordId)>> {
        loop {
            let Some(leaf) = &self.leaf else {
                return Ok(None);
            };

            let (item, next_page_id) = {
                let data = leaf.read_data();
                let node = LeafPageRef::new(&data[..]);
                if self.index < node.size() {
                    (Some(node.item_at(self.index)), INVALID_PAGE_ID)
                } else {
                    (None, node.next_page_id())
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Ok(Some(item));
            }

            // Exhausted this leaf: release it and move along the chain.
            self.bpm.unpin_page(self.leaf_page_id, false);
            self.leaf = None;
            if next_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            self.leaf = Some(self.bpm.fetch_page(next_page_id)?);
            self.leaf_page_id = next_page_id;
            self.index = 0;
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(u32, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        if self.leaf.take().is_some() {
            self.bpm.unpin_page(self.leaf_page_id, false);
        }
    }
}
