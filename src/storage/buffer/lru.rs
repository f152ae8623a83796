use super::replacer::{FrameId, Replacer};
use std::collections::{BTreeMap, HashMap};

/// Evicts frames in the order they became evictable.
///
/// A frame's position is fixed when it is unpinned. Reading a page through an
/// existing pin does not move it; only a pin followed by a fresh unpin does.
#[derive(Debug)]
pub struct LruReplacer {
    /// Evictable frames keyed by unpin sequence (oldest first)
    queue: BTreeMap<u64, FrameId>,
    /// Frame to its sequence number in `queue`
    positions: HashMap<FrameId, u64>,
    next_seq: u64,
    /// Maximum number of frames
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: BTreeMap::new(),
            positions: HashMap::with_capacity(max_size),
            next_seq: 0,
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.queue.pop_first()?;
        self.positions.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(seq) = self.positions.remove(&frame_id) {
            self.queue.remove(&seq);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.positions.contains_key(&frame_id) {
            return;
        }
        if self.queue.len() >= self.max_size {
            log::warn!("Replacer at capacity, ignoring unpin of frame {}", frame_id);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert(seq, frame_id);
        self.positions.insert(frame_id, seq);
    }

    fn size(&self) -> usize {
        self.queue.len()
    }
}
