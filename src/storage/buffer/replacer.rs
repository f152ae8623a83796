use std::fmt::Debug;

pub type FrameId = u32;

/// Chooses which unpinned frame the pool reuses next.
///
/// Only frames whose pin count has dropped to zero are tracked. Recency is
/// measured from the moment a frame becomes evictable, not from its last
/// access, so reads through an existing pin never reorder the candidates.
pub trait Replacer: Send + Sync + Debug {
    /// Untrack and return the frame that has been evictable the longest.
    /// Returns None if no frame is evictable.
    fn victim(&mut self) -> Option<FrameId>;

    /// Stop tracking a frame. Untracked frames are ignored.
    fn pin(&mut self, frame_id: FrameId);

    /// Start tracking a frame as the newest candidate. A frame already
    /// tracked keeps its position.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
