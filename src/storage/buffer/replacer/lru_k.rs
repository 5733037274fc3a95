use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K page replacement policy.
///
/// A frame with fewer than K recorded accesses has an infinite backward
/// K-distance, so such frames are evicted first, in FIFO order of first
/// sighting. Frames with at least K accesses are evicted by their Kth
/// most recent access, coldest first.
pub struct LruKReplacer {
    k: usize,
    inner: Mutex<ReplacerInner>,
}

struct ReplacerInner {
    entries: HashMap<FrameId, FrameEntry>,
    /// Frames with < k accesses, in insertion order (FIFO)
    history: VecDeque<FrameId>,
    /// Frames with >= k accesses; front is the coldest
    cache: VecDeque<FrameId>,
    /// Number of evictable entries
    curr_size: usize,
    /// Monotonic logical clock
    timestamp: u64,
}

struct FrameEntry {
    access_count: usize,
    last_access: u64,
    evictable: bool,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "lru-k requires k >= 1");
        Self {
            k,
            inner: Mutex::new(ReplacerInner {
                entries: HashMap::with_capacity(num_frames),
                history: VecDeque::new(),
                cache: VecDeque::new(),
                curr_size: 0,
                timestamp: 0,
            }),
        }
    }

    /// Record an access to the frame, creating its entry on first sight.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.timestamp += 1;
        let ts = inner.timestamp;

        if let Some(entry) = inner.entries.get_mut(&frame_id) {
            entry.access_count += 1;
            entry.last_access = ts;
            let count = entry.access_count;
            if count == self.k {
                // Graduation: leave the FIFO, join the back of the cache
                remove_from(&mut inner.history, frame_id);
                inner.cache.push_back(frame_id);
            } else if count > self.k {
                remove_from(&mut inner.cache, frame_id);
                inner.cache.push_back(frame_id);
            }
            return;
        }

        inner.entries.insert(
            frame_id,
            FrameEntry {
                access_count: 1,
                last_access: ts,
                evictable: false,
            },
        );
        if self.k <= 1 {
            inner.cache.push_back(frame_id);
        } else {
            inner.history.push_back(frame_id);
        }
    }

    /// Toggle a frame's evictable flag; list placement is unchanged.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = match inner.entries.get_mut(&frame_id) {
            Some(entry) => entry,
            None => return,
        };
        let previous = entry.evictable;
        entry.evictable = evictable;
        if previous && !evictable {
            inner.curr_size -= 1;
        } else if !previous && evictable {
            inner.curr_size += 1;
        }
    }

    /// Evict the frame with the largest backward K-distance among
    /// evictable frames: first evictable in history, then in cache.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.curr_size == 0 {
            return None;
        }

        let entries = &inner.entries;
        let victim = inner
            .history
            .iter()
            .chain(inner.cache.iter())
            .copied()
            .find(|f| entries[f].evictable)?;

        let entry = inner.entries.remove(&victim).expect("victim has an entry");
        if entry.access_count >= self.k {
            remove_from(&mut inner.cache, victim);
        } else {
            remove_from(&mut inner.history, victim);
        }
        inner.curr_size -= 1;
        Some(victim)
    }

    /// Remove a frame and its access history regardless of K-distance.
    ///
    /// Removing a non-evictable frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = match inner.entries.remove(&frame_id) {
            Some(entry) => entry,
            None => return,
        };
        assert!(entry.evictable, "remove called on a non-evictable frame");
        if entry.access_count >= self.k {
            remove_from(&mut inner.cache, frame_id);
        } else {
            remove_from(&mut inner.history, frame_id);
        }
        inner.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) {
    if let Some(pos) = list.iter().position(|&f| f == frame_id) {
        list.remove(pos);
    }
}
