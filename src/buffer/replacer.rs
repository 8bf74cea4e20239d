use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::common::config::FrameId;

/// Eviction policy over pinnable frames.
pub trait Replacer {
    /// Selects and removes a victim frame, or `None` if nothing is evictable.
    fn evict(&self) -> Option<FrameId>;
    fn record_access(&self, frame_id: FrameId);
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);
    /// Removes a frame outright. The frame must be evictable; an unknown
    /// frame is a no-op.
    fn remove(&self, frame_id: FrameId);
    /// Number of evictable frames.
    fn size(&self) -> usize;
}

struct LRUKNode {
    // Access timestamps, most recent first. The k-th entry (if present)
    // defines the backward k-distance.
    history: VecDeque<u64>,
    is_evictable: bool,
}

struct ReplacerState {
    node_store: HashMap<FrameId, LRUKNode>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K replacer.
///
/// The victim is the evictable frame with the largest backward k-distance,
/// where a frame with fewer than k recorded accesses has distance +inf.
/// Ties (including several +inf candidates) are broken by the oldest
/// recorded timestamp. Operations are O(n) in the number of tracked
/// frames, which is fine at teaching scale.
pub struct LRUKReplacer {
    state: Mutex<ReplacerState>,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");

        Self {
            state: Mutex::new(ReplacerState {
                node_store: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            replacer_size: num_frames,
            k,
        }
    }
}

impl Replacer for LRUKReplacer {
    fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();
        let now = state.current_timestamp;

        // (frame, k-distance with None as +inf, oldest access)
        let mut victim: Option<(FrameId, Option<u64>, u64)> = None;

        for (&frame_id, node) in &state.node_store {
            if !node.is_evictable {
                continue;
            }

            let k_distance = node.history.get(self.k - 1).map(|&ts| now - ts);
            let oldest = *node.history.back().expect("node with empty history");

            let better = match victim {
                None => true,
                Some((_, best_distance, best_oldest)) => match (k_distance, best_distance) {
                    (None, Some(_)) => true,
                    (Some(_), None) => false,
                    (None, None) => oldest < best_oldest,
                    (Some(d), Some(b)) => d > b || (d == b && oldest < best_oldest),
                },
            };
            if better {
                victim = Some((frame_id, k_distance, oldest));
            }
        }

        let (frame_id, _, _) = victim?;
        state.node_store.remove(&frame_id);
        state.evictable_count -= 1;
        Some(frame_id)
    }

    fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut state = self.state.lock().unwrap();
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;

        if let Some(node) = state.node_store.get_mut(&frame_id) {
            node.history.push_front(timestamp);
            return;
        }

        let mut history = VecDeque::new();
        history.push_front(timestamp);
        state.node_store.insert(
            frame_id,
            LRUKNode {
                history,
                is_evictable: false,
            },
        );
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock().unwrap();

        let node = state
            .node_store
            .get_mut(&frame_id)
            .expect("set_evictable on unknown frame");

        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            state.evictable_count += 1;
        } else {
            state.evictable_count -= 1;
        }
    }

    fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock().unwrap();

        let Some(node) = state.node_store.get(&frame_id) else {
            return;
        };
        assert!(node.is_evictable, "removing a non-evictable frame");

        state.node_store.remove(&frame_id);
        state.evictable_count -= 1;
    }

    fn size(&self) -> usize {
        self.state.lock().unwrap().evictable_count
    }
}
