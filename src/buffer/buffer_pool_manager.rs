use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::common::{FrameId, PageId, Result, StrataError, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruKReplacer, Page};

/// Bookkeeping protected by the pool's exclusive latch
struct BufferPoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames not currently holding any page
    free_list: VecDeque<FrameId>,
    /// Monotonic page ID allocator; IDs are never reused
    next_page_id: u32,
}

/// BufferPoolManager owns a fixed set of frames and moves pages between
/// them and disk. Residency is tracked in an extendible hash page table and
/// victims are chosen by the LRU-K replacer.
///
/// Every successful `new_page` or `fetch_page` pins the frame and must be
/// paired with exactly one `unpin_page`. A single exclusive latch covers
/// the pool bookkeeping; disk reads and writes on the miss/eviction paths
/// run inside it.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Page>>,
    replacer: LruKReplacer,
    disk_scheduler: DiskScheduler,
    inner: Mutex<BufferPoolInner>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames with LRU-`k` replacement over
    /// the given disk manager. Page ID allocation resumes after the pages
    /// already on disk; page 0 is reserved for the header page.
    pub fn new(pool_size: usize, k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(Page::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let next_page_id = disk_manager.num_pages().max(1);

        Self {
            pool_size,
            frames,
            replacer: LruKReplacer::new(pool_size, k),
            disk_scheduler: DiskScheduler::new(disk_manager),
            inner: Mutex::new(BufferPoolInner {
                page_table: ExtendibleHashTable::new(crate::common::DEFAULT_BUCKET_SIZE),
                free_list,
                next_page_id,
            }),
        }
    }

    /// Allocates a new page ID and binds it to a pinned, zeroed frame.
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, Arc<Page>)> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = &self.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        debug!("allocated new page {} in frame {}", page_id, frame_id);
        Ok((page_id, Arc::clone(frame)))
    }

    /// Ensures `page_id` is resident, pins its frame, and returns the
    /// handle. On a miss the page is read from disk into a free or evicted
    /// frame; fails with `BufferPoolFull` when no frame can be freed.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        if page_id == INVALID_PAGE_ID {
            return Err(StrataError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.find(&page_id) {
            trace!("buffer pool hit for page {}", page_id);
            let frame = &self.frames[frame_id.as_usize()];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        trace!("buffer pool miss for page {}, loading from disk", page_id);
        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        self.disk_scheduler.schedule_read_sync(page_id, &mut data)?;
        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on `page_id`, marking the frame dirty when the caller
    /// wrote to it. Returns false if the page is not resident or its pin
    /// count was already zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == Some(0) {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes `page_id` to disk unconditionally and clears its dirty flag.
    /// Returns `Ok(false)` for the invalid sentinel or a non-resident page.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let inner = self.inner.lock();
        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id.as_usize()];
        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.disk_scheduler.schedule_write_sync(page_id, &data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page with a valid ID.
    pub fn flush_all(&self) -> Result<()> {
        let _inner = self.inner.lock();

        for frame in &self.frames {
            let page_id = frame.page_id();
            if page_id == INVALID_PAGE_ID {
                continue;
            }
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(page_id, &data)?;
            frame.set_dirty(false);
        }
        debug!("flushed all resident pages");
        Ok(())
    }

    /// Removes `page_id` from the pool. Returns `Ok(false)` while the page
    /// is pinned; a page that is not resident deletes trivially.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = inner.page_table.find(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.as_usize()];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(true)
    }

    /// Returns the pin count of `page_id`, or None if it is not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .find(&page_id)
            .map(|frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Hands out a frame for a new binding: the free list first, then a
    /// replacer victim. A dirty victim is written back before its frame is
    /// reused.
    fn acquire_frame(&self, inner: &mut BufferPoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.evict().ok_or(StrataError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.disk_scheduler.schedule_write_sync(old_page_id, &data)?;
        }
        inner.page_table.remove(&old_page_id);
        frame.reset();

        trace!("evicted page {} from frame {}", old_page_id, frame_id);
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, 2, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_new_pool_starts_free() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, _page) = bpm.new_page().unwrap();
        assert_eq!(page_id, PageId::new(1)); // page 0 is the header page
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);
    }

    #[test]
    fn test_write_then_read_back() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, page) = bpm.new_page().unwrap();
        {
            let mut data = page.write_data();
            data[0] = 42;
            data[100] = 255;
        }
        assert!(bpm.unpin_page(page_id, true));

        let page = bpm.fetch_page(page_id).unwrap();
        {
            let data = page.read_data();
            assert_eq!(data[0], 42);
            assert_eq!(data[100], 255);
        }
        assert!(bpm.unpin_page(page_id, false));
    }

    #[test]
    fn test_unpin_balance() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, _page) = bpm.new_page().unwrap();
        let _again = bpm.fetch_page(page_id).unwrap();
        assert_eq!(bpm.get_pin_count(page_id), Some(2));

        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(page_id, false));
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let (bpm, _temp) = create_bpm(2);

        let (a, _pa) = bpm.new_page().unwrap();
        let (b, _pb) = bpm.new_page().unwrap();
        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));

        bpm.unpin_page(a, false);
        assert!(bpm.new_page().is_ok());
        bpm.unpin_page(b, false);
    }

    #[test]
    fn test_dirty_victim_written_on_eviction() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(1, 2, Arc::clone(&dm));

        let (a, page) = bpm.new_page().unwrap();
        page.write_data()[0] = 0xCD;
        assert!(matches!(bpm.new_page(), Err(StrataError::BufferPoolFull)));
        assert!(bpm.unpin_page(a, true));

        // Allocating B evicts A, which must reach disk first.
        let (b, _pb) = bpm.new_page().unwrap();
        assert_ne!(a, b);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(a, &mut data).unwrap();
        assert_eq!(data[0], 0xCD);
        bpm.unpin_page(b, false);
    }

    #[test]
    fn test_flush_page() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(10, 2, Arc::clone(&dm));

        let (page_id, page) = bpm.new_page().unwrap();
        page.write_data()[10] = 9;
        bpm.unpin_page(page_id, true);

        assert!(bpm.flush_page(page_id).unwrap());
        assert!(!bpm.flush_page(PageId::new(999)).unwrap());
        assert!(!bpm.flush_page(INVALID_PAGE_ID).unwrap());

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert_eq!(data[10], 9);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(10);

        let (page_id, _page) = bpm.new_page().unwrap();
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, false);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.get_pin_count(page_id), None);
        assert_eq!(bpm.free_frame_count(), 10);

        // Deleting a non-resident page succeeds trivially.
        assert!(bpm.delete_page(PageId::new(321)).unwrap());
    }

    #[test]
    fn test_page_ids_never_reused() {
        let (bpm, _temp) = create_bpm(4);

        let (a, _pa) = bpm.new_page().unwrap();
        bpm.unpin_page(a, false);
        bpm.delete_page(a).unwrap();

        let (b, _pb) = bpm.new_page().unwrap();
        assert!(b > a);
        bpm.unpin_page(b, false);
    }

    #[test]
    fn test_eviction_respects_pins() {
        let (bpm, _temp) = create_bpm(3);

        let (a, _pa) = bpm.new_page().unwrap();
        let (b, _pb) = bpm.new_page().unwrap();
        let (c, _pc) = bpm.new_page().unwrap();

        // Only B is unpinned, so it is the only possible victim.
        bpm.unpin_page(b, false);
        let (_d, _pd) = bpm.new_page().unwrap();

        assert_eq!(bpm.get_pin_count(b), None);
        assert_eq!(bpm.get_pin_count(a), Some(1));
        assert_eq!(bpm.get_pin_count(c), Some(1));
    }
}
