//! Versioned page reads over the base file.
//!
//! A read at boundary `S` asks the WAL first for the newest frame with
//! sequence `<= S` and only falls back to the base image when there is none.
//! The base file itself changes only when a checkpoint merges frames into it.

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;

use crate::concurrency::CommitSequence;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::PageCache;
use crate::storage::disk::PageManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::meta::FileHeader;
use crate::storage::page::PageNumber;
use crate::storage::wal::WalManager;

pub struct PageStore {
    page_manager: Mutex<PageManager>,
    cache: PageCache,
    header: FileHeader,
}

impl PageStore {
    pub fn new(page_manager: PageManager, cache_pages: usize) -> Self {
        let header = page_manager.header();
        Self {
            page_manager: Mutex::new(page_manager),
            cache: PageCache::new(Box::new(LruReplacer::new(cache_pages)), cache_pages),
            header,
        }
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size
    }

    pub fn store_id(&self) -> u64 {
        self.header.store_id
    }

    /// Image of `page` as of `boundary`.
    pub fn read(
        &self,
        page: PageNumber,
        boundary: CommitSequence,
        wal: &WalManager,
    ) -> StorageResult<Bytes> {
        if let Some(data) = wal.read_frame(page, boundary)? {
            return Ok(data);
        }
        self.read_base(page)
    }

    /// Image of `page` in the base file, ignoring the WAL.
    pub fn read_base(&self, page: PageNumber) -> StorageResult<Bytes> {
        if let Some(data) = self.cache.get(page) {
            return Ok(data);
        }

        // Fill the cache under the file lock so a concurrent checkpoint
        // cannot slip its new image in between our read and our insert.
        let mut page_manager = self.page_manager.lock();
        if let Some(data) = self.cache.get(page) {
            return Ok(data);
        }
        let mut buf = vec![0u8; self.page_size()];
        let present = page_manager.read_page(page, &mut buf)?;
        if !present {
            debug!("{} is past the end of the base file", page);
        }

        let data = Bytes::from(buf);
        self.cache.insert(page, data.clone());
        Ok(data)
    }

    /// Overwrites the base image of `page`. Only checkpoints call this.
    pub fn write_base(&self, page: PageNumber, data: Bytes) -> StorageResult<()> {
        if data.len() != self.page_size() {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size(),
                actual: data.len(),
            });
        }

        let mut page_manager = self.page_manager.lock();
        let result = page_manager.write_page(page, &data);
        match result {
            Ok(()) => self.cache.insert(page, data),
            // The file may hold a partial write; do not trust the cache either.
            Err(_) => self.cache.invalidate(page),
        }
        result
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.page_manager.lock().sync()
    }

    /// Highest sequence the base file may already reflect.
    pub fn horizon(&self) -> CommitSequence {
        self.page_manager.lock().horizon()
    }

    /// Durably raises the checkpoint horizon. Must run before any page newer
    /// than the current horizon is written back.
    pub fn set_horizon(&self, horizon: CommitSequence) -> StorageResult<()> {
        self.page_manager.lock().set_horizon(horizon)
    }

    /// Number of pages physically present in the base file.
    pub fn base_pages(&self) -> StorageResult<u32> {
        self.page_manager.lock().num_pages()
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub(crate) fn replace_base_file(&self, file: std::fs::File) -> std::fs::File {
        self.page_manager.lock().replace_file(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::WalConfig;
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 512;

    fn page(fill: u8) -> Bytes {
        Bytes::from(vec![fill; PAGE_SIZE])
    }

    #[test]
    fn test_read_prefers_wal_frame() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");
        let store = PageStore::new(PageManager::create(&db_path, PAGE_SIZE, 5)?, 8);
        let mut config = WalConfig::for_database(&db_path, PAGE_SIZE, 5);
        config.sync_on_commit = false;
        let wal = WalManager::create(config)?;

        store.write_base(PageNumber(1), page(9))?;
        wal.append(CommitSequence::new(2), &[(PageNumber(1), page(2))])?;

        // Before the frame's sequence the base image shows through.
        assert_eq!(store.read(PageNumber(1), CommitSequence::new(1), &wal)?, page(9));
        assert_eq!(store.read(PageNumber(1), CommitSequence::new(2), &wal)?, page(2));

        Ok(())
    }

    #[test]
    fn test_unwritten_page_reads_zeroes() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::new(PageManager::create(&dir.path().join("t.db"), PAGE_SIZE, 1)?, 8);

        assert_eq!(store.read_base(PageNumber(4))?, Bytes::from(vec![0u8; PAGE_SIZE]));

        Ok(())
    }

    #[test]
    fn test_write_base_refreshes_cache() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::new(PageManager::create(&dir.path().join("t.db"), PAGE_SIZE, 1)?, 8);

        store.write_base(PageNumber(1), page(1))?;
        assert_eq!(store.read_base(PageNumber(1))?, page(1));

        store.write_base(PageNumber(1), page(2))?;
        assert_eq!(store.read_base(PageNumber(1))?, page(2));
        assert_eq!(store.cached_pages(), 1);

        Ok(())
    }

    #[test]
    fn test_concurrent_fill_never_hides_newer_image() -> Result<()> {
        let dir = tempdir()?;
        // One cache slot: readers alternating pages keep missing.
        let store = PageStore::new(PageManager::create(&dir.path().join("t.db"), PAGE_SIZE, 1)?, 1);
        store.write_base(PageNumber(1), page(0))?;
        store.write_base(PageNumber(2), page(0))?;
        let done = AtomicBool::new(false);

        thread::scope(|s| -> Result<()> {
            for _ in 0..4 {
                s.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        store.read_base(PageNumber(1)).unwrap();
                        store.read_base(PageNumber(2)).unwrap();
                    }
                });
            }

            let result = (1..=200u8).try_for_each(|v| -> Result<()> {
                store.write_base(PageNumber(1), page(v))?;
                let seen = store.read_base(PageNumber(1))?;
                anyhow::ensure!(seen == page(v), "stale image after write {}", v);
                Ok(())
            });
            done.store(true, Ordering::Relaxed);
            result
        })?;

        Ok(())
    }

    #[test]
    fn test_horizon_persists() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.db");
        {
            let store = PageStore::new(PageManager::create(&path, PAGE_SIZE, 1)?, 8);
            store.set_horizon(CommitSequence::new(5))?;
            assert_eq!(store.horizon(), CommitSequence::new(5));
        }

        let store = PageStore::new(PageManager::open(&path)?, 8);
        assert_eq!(store.horizon(), CommitSequence::new(5));
        Ok(())
    }

    #[test]
    fn test_write_base_wrong_size() -> Result<()> {
        let dir = tempdir()?;
        let store = PageStore::new(PageManager::create(&dir.path().join("t.db"), PAGE_SIZE, 1)?, 8);

        let result = store.write_base(PageNumber(1), Bytes::from_static(b"short"));
        assert!(matches!(result, Err(StorageError::InvalidPageSize { .. })));

        Ok(())
    }
}
