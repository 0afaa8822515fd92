use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Dirty flag packed into the top bit of the frame state word; the low
/// bits hold the pin count.
const DIRTY_FLAG: u32 = 1 << 31;
const PIN_MASK: u32 = DIRTY_FLAG - 1;

/// A buffer pool frame: one page-sized slot of memory plus the metadata
/// the pool needs to manage it. A frame is free (page id invalid) or holds
/// exactly one page; a positive pin count keeps it from being evicted.
///
/// Pin count and dirty flag share one atomic state word so the frame can
/// enforce the access contract directly: only a pinned frame may be
/// written or marked dirty, and the dirty bit is monotonic for as long as
/// any pin is outstanding. A caller that has unpinned has no right to
/// touch the buffer; `write_data` rejects it.
pub struct Page {
    /// Index of this frame in the pool, fixed at construction
    frame_id: FrameId,
    /// The page currently bound to this frame (INVALID_PAGE_ID if free)
    page_id: AtomicU32,
    /// Dirty bit plus pin count
    state: AtomicU32,
    /// The page data itself
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.as_u32()),
            state: AtomicU32::new(0),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_u32(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.state.load(Ordering::Acquire) & PIN_MASK
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev & PIN_MASK < PIN_MASK);
        (prev & PIN_MASK) + 1
    }

    /// Decrements the pin count and returns the new value, or None if the
    /// count was already zero. The dirty bit rides along untouched.
    pub(crate) fn unpin(&self) -> Option<u32> {
        loop {
            let state = self.state.load(Ordering::Acquire);
            if state & PIN_MASK == 0 {
                return None;
            }
            if self
                .state
                .compare_exchange(state, state - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some((state - 1) & PIN_MASK);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.load(Ordering::Acquire) & DIRTY_FLAG != 0
    }

    /// Sets or clears the dirty bit. Marking a frame dirty requires an
    /// outstanding pin (the write that dirtied it must have held one);
    /// clearing is allowed any time, since flushes run on unpinned frames.
    pub(crate) fn set_dirty(&self, dirty: bool) {
        if dirty {
            let prev = self.state.fetch_or(DIRTY_FLAG, Ordering::AcqRel);
            assert!(
                prev & PIN_MASK > 0,
                "frame {} marked dirty without a pin",
                self.frame_id
            );
        } else {
            self.state.fetch_and(!DIRTY_FLAG, Ordering::AcqRel);
        }
    }

    /// Returns a read guard over the page data.
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Returns a write guard over the page data. Writing an unpinned frame
    /// is a programming error: the pool may rebind it at any moment.
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        assert!(
            self.pin_count() > 0,
            "frame {} written without a pin",
            self.frame_id
        );
        self.data.write()
    }

    /// Loads page bytes into the frame; pool-internal, used while a frame
    /// is being bound and before it is handed out.
    pub(crate) fn copy_from(&self, src: &[u8]) {
        assert_eq!(src.len(), PAGE_SIZE);
        self.data.write().copy_from_slice(src);
    }

    /// Snapshots the frame contents for a flush or eviction write-back.
    pub(crate) fn copy_to(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), PAGE_SIZE);
        dst.copy_from_slice(&**self.data.read());
    }

    /// Returns the frame to its free state: invalid page id, no pins,
    /// clean, zeroed memory.
    pub(crate) fn reset(&self) {
        self.page_id
            .store(INVALID_PAGE_ID.as_u32(), Ordering::Release);
        self.state.store(0, Ordering::Release);
        self.data.write().fill(0);
    }
}
