pub mod lru;
pub mod replacer;

use crate::storage::page::PageNumber;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

struct CachedPage {
    page: PageNumber,
    data: Bytes,
}

/// Cache of base-file page images.
///
/// Only pages resolved from the base file are cached here; WAL frames are
/// read through the frame index. Entries are immutable `Bytes`, so a hit
/// hands out a cheap clone and nothing needs to stay pinned.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<PageCacheInner>,
}

struct PageCacheInner {
    page_table: DashMap<PageNumber, FrameId>,
    frames: RwLock<HashMap<FrameId, CachedPage>>,
    replacer: Mutex<Box<dyn Replacer>>,
    next_frame_id: AtomicU32,
    capacity: usize,
}

impl PageCache {
    pub fn new(replacer: Box<dyn Replacer>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PageCacheInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(capacity)),
                replacer: Mutex::new(replacer),
                next_frame_id: AtomicU32::new(0),
                capacity,
            }),
        }
    }

    pub fn get(&self, page: PageNumber) -> Option<Bytes> {
        let frame_id = self.inner.page_table.get(&page).map(|e| *e.value())?;
        let frames = self.inner.frames.read();
        let cached = frames.get(&frame_id)?;

        // The frame may have been handed to another page since the lookup.
        if cached.page != page {
            return None;
        }

        self.inner.replacer.lock().touch(frame_id);
        Some(cached.data.clone())
    }

    /// Caches `data` as the current base image of `page`, replacing any
    /// previous entry and evicting the least recently used one when full.
    pub fn insert(&self, page: PageNumber, data: Bytes) {
        if self.inner.capacity == 0 {
            return;
        }

        let mut frames = self.inner.frames.write();
        let mut replacer = self.inner.replacer.lock();

        if let Some(frame_id) = self.inner.page_table.get(&page).map(|e| *e.value()) {
            if let Some(cached) = frames.get_mut(&frame_id) {
                cached.data = data;
                replacer.touch(frame_id);
                return;
            }
        }

        let frame_id = if frames.len() < self.inner.capacity {
            self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst)
        } else {
            let Some(victim) = replacer.evict() else {
                return;
            };
            if let Some(old) = frames.remove(&victim) {
                self.inner.page_table.remove(&old.page);
            }
            victim
        };

        frames.insert(frame_id, CachedPage { page, data });
        self.inner.page_table.insert(page, frame_id);
        replacer.touch(frame_id);
    }

    pub fn invalidate(&self, page: PageNumber) {
        let mut frames = self.inner.frames.write();
        if let Some((_, frame_id)) = self.inner.page_table.remove(&page) {
            frames.remove(&frame_id);
            self.inner.replacer.lock().remove(frame_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}
