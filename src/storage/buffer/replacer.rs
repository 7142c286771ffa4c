use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy for the page cache.
pub trait Replacer: Send + Sync + Debug {
    /// Select a frame to evict and forget it. Returns None if nothing is tracked.
    fn evict(&mut self) -> Option<FrameId>;

    /// Record an access to a frame, tracking it if it is new.
    fn touch(&mut self, frame_id: FrameId);

    /// Stop tracking a frame.
    fn remove(&mut self, frame_id: FrameId);

    /// Get the number of tracked frames.
    fn size(&self) -> usize;
}
