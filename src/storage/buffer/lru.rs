use super::replacer::{FrameId, Replacer};
use std::collections::{BTreeMap, HashMap};

/// Least-recently-used replacer.
///
/// Every access stamps the frame with a fresh tick; the victim is the frame
/// with the oldest tick.
#[derive(Debug)]
pub struct LruReplacer {
    /// Access order: tick -> frame (oldest first)
    order: BTreeMap<u64, FrameId>,
    /// Last tick of each tracked frame
    ticks: HashMap<FrameId, u64>,
    next_tick: u64,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: BTreeMap::new(),
            ticks: HashMap::with_capacity(capacity),
            next_tick: 0,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.order.pop_first()?;
        self.ticks.remove(&frame_id);
        Some(frame_id)
    }

    fn touch(&mut self, frame_id: FrameId) {
        if let Some(old) = self.ticks.insert(frame_id, self.next_tick) {
            self.order.remove(&old);
        }
        self.order.insert(self.next_tick, frame_id);
        self.next_tick += 1;
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(tick) = self.ticks.remove(&frame_id) {
            self.order.remove(&tick);
        }
    }

    fn size(&self) -> usize {
        self.ticks.len()
    }
}
