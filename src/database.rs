use crate::concurrency::CommitSequence;
use crate::config::{Config, DbFlag};
use crate::error::Result;
use crate::events::Event;
use crate::snapshot::{Snapshot, SnapshotRange, SnapshotToken};
use crate::storage::disk::PageManager;
use crate::storage::wal::{WalConfig, WalManager};
use crate::storage::{PageNumber, PageStore, RecoveryReport};
use crate::transaction::{Reader, StoreInfo, TransactionCoordinator, Writer};
use bytes::Bytes;
use log::info;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// High-level handle on one store: the base file at `path` and its log at
/// `<path>-wal`.
pub struct Database {
    path: PathBuf,
    coordinator: Arc<TransactionCoordinator>,
    recovery: RecoveryReport,
}

impl Database {
    /// Create a new store. Fails if a file already exists at `path`.
    pub fn create(path: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let store_id = rand::random::<u64>();
        let page_manager = PageManager::create(path, config.page_size, store_id)?;
        let wal = WalManager::create(wal_config(path, &config, &page_manager))?;
        let store = PageStore::new(page_manager, config.cache_pages);
        info!(
            "Created store {:016x} at {:?} ({} byte pages)",
            store_id, path, config.page_size
        );

        Ok(Self {
            path: path.to_path_buf(),
            coordinator: Arc::new(TransactionCoordinator::new(config, store, wal)),
            recovery: RecoveryReport::default(),
        })
    }

    /// Open an existing store and recover its log.
    ///
    /// The page size comes from the file; `config.page_size` is ignored.
    pub fn open(path: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let page_manager = PageManager::open(path)?;
        let (wal, report) = WalManager::open(wal_config(path, &config, &page_manager))?;
        let store = PageStore::new(page_manager, config.cache_pages);
        config.event_sink.emit(&Event::Recovery {
            commits: report.commits,
            frames: report.frames,
            truncated_bytes: report.truncated_bytes,
            last_sequence: report.last_sequence,
            corruption: report.corruption.clone(),
        });

        Ok(Self {
            path: path.to_path_buf(),
            coordinator: Arc::new(TransactionCoordinator::new(config, store, wal)),
            recovery: report,
        })
    }

    pub fn open_or_create(path: &Path, config: Config) -> Result<Self> {
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What recovery found when the store was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    pub fn page_size(&self) -> usize {
        self.coordinator.page_size()
    }

    pub fn store_id(&self) -> u64 {
        self.coordinator.store_id()
    }

    pub fn read_mark(&self) -> CommitSequence {
        self.coordinator.read_mark()
    }

    pub fn begin_read(&self) -> Reader {
        self.coordinator.begin_read()
    }

    pub fn begin_read_at(&self, snapshot: &Snapshot) -> Result<Reader> {
        self.coordinator.begin_read_at(snapshot)
    }

    pub fn begin_write(&self) -> Result<Writer> {
        self.coordinator.begin_write()
    }

    pub fn read_at(&self, page: PageNumber, boundary: CommitSequence) -> Result<Bytes> {
        self.coordinator.read_at(page, boundary)
    }

    pub fn read_snapshot(&self, page: PageNumber, snapshot: &Snapshot) -> Result<Bytes> {
        self.coordinator.read_snapshot(page, snapshot)
    }

    pub fn capture(&self) -> Snapshot {
        self.coordinator.capture()
    }

    pub fn release(&self, snapshot: &Snapshot) -> Result<()> {
        self.coordinator.release(snapshot)
    }

    pub fn compare(&self, a: &Snapshot, b: &Snapshot) -> Ordering {
        self.coordinator.compare(a, b)
    }

    pub fn open_at(&self, token: &SnapshotToken) -> Result<Snapshot> {
        self.coordinator.open_at(token)
    }

    pub fn recover_snapshots(&self) -> Result<SnapshotRange> {
        self.coordinator.recover_snapshots()
    }

    pub fn checkpoint(&self) -> Result<usize> {
        self.coordinator.checkpoint()
    }

    pub fn set_flag(&self, flag: DbFlag, enabled: bool) -> bool {
        self.coordinator.set_flag(flag, enabled)
    }

    pub fn flag(&self, flag: DbFlag) -> bool {
        self.coordinator.flag(flag)
    }

    pub fn info(&self) -> Result<StoreInfo> {
        self.coordinator.info()
    }
}

fn wal_config(path: &Path, config: &Config, page_manager: &PageManager) -> WalConfig {
    let header = page_manager.header();
    WalConfig {
        sync_on_commit: config.sync_on_commit,
        horizon: page_manager.horizon(),
        ..WalConfig::for_database(path, header.page_size, header.store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::wal::wal_path;
    use crate::storage::StorageError;
    use anyhow::Result;
    use tempfile::tempdir;

    fn config() -> Config {
        Config::builder().page_size(1024).build().unwrap()
    }

    #[test]
    fn test_create_database() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        let db = Database::create(&db_path, config())?;
        assert!(db_path.exists());
        assert!(wal_path(&db_path).exists());
        assert_eq!(db.page_size(), 1024);
        assert_eq!(db.read_mark(), CommitSequence::ZERO);
        Ok(())
    }

    #[test]
    fn test_create_duplicate_database() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        let _db = Database::create(&db_path, config())?;
        let result = Database::create(&db_path, config());
        assert!(matches!(result, Err(Error::Storage(StorageError::Io(_)))));
        Ok(())
    }

    #[test]
    fn test_open_nonexistent_database() -> Result<()> {
        let dir = tempdir()?;
        let result = Database::open(&dir.path().join("nonexistent.db"), config());
        assert!(result.map(|_| ()).unwrap_err().is_io());
        Ok(())
    }

    #[test]
    fn test_open_keeps_file_page_size() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");
        let store_id = Database::create(&db_path, config())?.store_id();

        let db = Database::open(&db_path, Config::default())?;
        assert_eq!(db.page_size(), 1024);
        assert_eq!(db.store_id(), store_id);
        Ok(())
    }

    #[test]
    fn test_unvalidated_config_rejected() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");
        let config = Config {
            page_size: 16,
            ..Config::default()
        };

        assert!(matches!(
            Database::create(&db_path, config.clone()),
            Err(Error::Config(_))
        ));
        assert!(!db_path.exists());

        Database::create(&db_path, Config::default())?;
        assert!(matches!(
            Database::open(&db_path, config),
            Err(Error::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_open_or_create() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("test.db");

        let store_id = {
            let db = Database::open_or_create(&db_path, config())?;
            let mut writer = db.begin_write()?;
            let page = writer.allocate()?;
            writer.write(page, b"kept")?;
            writer.commit()?;
            db.store_id()
        };

        let db = Database::open_or_create(&db_path, config())?;
        assert_eq!(db.store_id(), store_id);
        assert_eq!(db.recovery_report().commits, 1);
        assert_eq!(&db.begin_read().read(PageNumber(1))?[..4], b"kept");
        Ok(())
    }
}
