use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::FrameId;

/// Access bookkeeping for a single tracked frame
#[derive(Debug)]
struct FrameEntry {
    frame_id: FrameId,
    /// Number of recorded accesses, saturating at k
    uses: usize,
    is_evictable: bool,
}

impl FrameEntry {
    fn new(frame_id: FrameId) -> Self {
        // Frames are evictable by default on first appearance; the buffer
        // pool pins them explicitly right after recording the access.
        Self {
            frame_id,
            uses: 1,
            is_evictable: true,
        }
    }
}

#[derive(Debug, Default)]
struct ReplacerState {
    /// Frames with fewer than k recorded accesses, oldest first
    temp: VecDeque<FrameEntry>,
    /// Frames with at least k recorded accesses, hottest at the back
    cached: VecDeque<FrameEntry>,
}

/// LRU-K replacement policy.
///
/// Frames are partitioned into a *temporary* queue (fewer than k recorded
/// accesses) and a *cached* queue (k or more). A victim is the first
/// evictable frame of the temporary queue in first-seen order, falling back
/// to the least recently used evictable frame of the cached queue. Frames
/// without k samples therefore always lose to frames that have earned them.
///
/// Every operation runs under the replacer's exclusive latch and is
/// O(pool size).
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `num_frames` frames with parameter
    /// `k >= 1`.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            k,
            num_frames,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Removes and returns the frame with the highest eviction priority, or
    /// None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let state = &mut *state;
        for queue in [&mut state.temp, &mut state.cached] {
            if let Some(pos) = queue.iter().position(|e| e.is_evictable) {
                return queue.remove(pos).map(|e| e.frame_id);
            }
        }
        None
    }

    /// Records an access to `frame_id`, promoting it to the cached queue
    /// once it reaches k accesses.
    pub fn record_access(&self, frame_id: FrameId) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();

        if let Some(pos) = state.cached.iter().position(|e| e.frame_id == frame_id) {
            let entry = state.cached.remove(pos).unwrap();
            state.cached.push_back(entry);
            return;
        }

        if let Some(pos) = state.temp.iter().position(|e| e.frame_id == frame_id) {
            state.temp[pos].uses += 1;
            if state.temp[pos].uses >= self.k {
                let entry = state.temp.remove(pos).unwrap();
                state.cached.push_back(entry);
            }
            return;
        }

        let entry = FrameEntry::new(frame_id);
        if self.k == 1 {
            state.cached.push_back(entry);
        } else {
            state.temp.push_back(entry);
        }
    }

    /// Sets whether `frame_id` may be chosen as a victim. No-op for frames
    /// the replacer is not tracking.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let state = &mut *state;
        for queue in [&mut state.temp, &mut state.cached] {
            if let Some(entry) = queue.iter_mut().find(|e| e.frame_id == frame_id) {
                entry.is_evictable = is_evictable;
                return;
            }
        }
    }

    /// Drops `frame_id` from the replacer. Removing a frame that is pinned
    /// (non-evictable) is a programming error. No-op for untracked frames.
    pub fn remove(&self, frame_id: FrameId) {
        self.check_frame(frame_id);
        let mut state = self.state.lock();
        let state = &mut *state;
        for queue in [&mut state.temp, &mut state.cached] {
            if let Some(pos) = queue.iter().position(|e| e.frame_id == frame_id) {
                assert!(
                    queue[pos].is_evictable,
                    "cannot remove non-evictable frame {} from replacer",
                    frame_id
                );
                queue.remove(pos);
                return;
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state
            .temp
            .iter()
            .chain(state.cached.iter())
            .filter(|e| e.is_evictable)
            .count()
    }

    /// Returns the k parameter of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id {} out of range for replacer of {} frames",
            frame_id,
            self.num_frames
        );
    }
}
