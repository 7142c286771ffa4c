//! The transaction coordinator.
//!
//! Owns everything readers and writers share: the page store, the WAL, the
//! snapshot registry, the read mark and the writer slot. Commits and
//! checkpoints run under one coordinating lock; readers never take it.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;

use super::id::{TransactionId, TransactionIdGenerator};
use super::reader::Reader;
use super::writer::Writer;
use crate::concurrency::{CommitSequence, ReadMark, WriterSlot};
use crate::config::{Config, DbFlag, Flags};
use crate::error::{Error, Result};
use crate::events::{Event, FailureKind};
use crate::snapshot::{self, Snapshot, SnapshotRange, SnapshotRegistry, SnapshotToken};
use crate::storage::page::meta::MetaPage;
use crate::storage::{PageNumber, PageStore, StorageError, WalManager};

/// Point-in-time summary of a store, as shown by `snapdb info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub page_size: usize,
    pub store_id: u64,
    pub read_mark: CommitSequence,
    pub page_count: u32,
    pub free_pages: usize,
    /// Pages physically present in the base file.
    pub base_file_pages: u32,
    pub wal_frames: usize,
    pub wal_commits: usize,
    pub wal_bytes: u64,
    pub base_sequence: CommitSequence,
    pub checkpointed_through: CommitSequence,
    pub live_snapshots: usize,
}

pub struct TransactionCoordinator {
    config: Config,
    store: PageStore,
    wal: WalManager,
    registry: Arc<SnapshotRegistry>,
    read_mark: ReadMark,
    writer_slot: WriterSlot,
    /// Serializes commit publication against checkpoints.
    commit_lock: Mutex<()>,
    id_generator: TransactionIdGenerator,
    flags: Flags,
}

impl TransactionCoordinator {
    /// The read mark starts at the newest sequence the WAL knows about,
    /// counting commits already folded into the base file.
    pub fn new(config: Config, store: PageStore, wal: WalManager) -> Self {
        let read_mark = ReadMark::new(wal.last_sequence());
        let registry = Arc::new(SnapshotRegistry::new(
            store.store_id(),
            wal.base_sequence(),
        ));
        let flags = Flags::new(config.double_quoted_strings);

        Self {
            config,
            store,
            wal,
            registry,
            read_mark,
            writer_slot: WriterSlot::new(),
            commit_lock: Mutex::new(()),
            id_generator: TransactionIdGenerator::new(),
            flags,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    pub fn store_id(&self) -> u64 {
        self.store.store_id()
    }

    /// Highest committed sequence.
    pub fn read_mark(&self) -> CommitSequence {
        self.read_mark.current()
    }

    pub(crate) fn store(&self) -> &PageStore {
        &self.store
    }

    pub(crate) fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub(crate) fn writer_slot(&self) -> &WriterSlot {
        &self.writer_slot
    }

    pub(crate) fn emit(&self, event: Event) {
        self.config.event_sink.emit(&event);
    }

    pub(crate) fn report_failure(&self, kind: FailureKind, message: String) {
        self.emit(Event::Error { kind, message });
    }

    pub fn begin_read(self: &Arc<Self>) -> Reader {
        let snapshot = self.capture();
        Reader::new(self.id_generator.next(), Arc::clone(self), snapshot)
    }

    /// Starts a reader on the boundary of an existing live snapshot.
    pub fn begin_read_at(self: &Arc<Self>, snapshot: &Snapshot) -> Result<Reader> {
        self.check_owned(snapshot)?;
        let shared = self.registry.share(snapshot)?;
        Ok(Reader::new(self.id_generator.next(), Arc::clone(self), shared))
    }

    /// Claims the writer slot according to the configured policy.
    pub fn begin_write(self: &Arc<Self>) -> Result<Writer> {
        let id = self.id_generator.next();
        self.writer_slot.acquire(id, self.config.writer_policy)?;

        // No other commit can run while we hold the slot, so the mark we see
        // here stays the newest sequence for the writer's lifetime.
        let boundary = self.read_mark.current();
        match self.load_meta(boundary) {
            Ok(meta) => Ok(Writer::new(id, Arc::clone(self), boundary, meta)),
            Err(e) => {
                self.writer_slot.release(id);
                Err(e)
            }
        }
    }

    pub fn capture(&self) -> Snapshot {
        self.registry.capture(&self.read_mark)
    }

    pub fn release(&self, snapshot: &Snapshot) -> Result<()> {
        self.check_owned(snapshot)?;
        self.registry.release(snapshot.id())
    }

    pub fn compare(&self, a: &Snapshot, b: &Snapshot) -> Ordering {
        snapshot::compare(a, b)
    }

    pub fn open_at(&self, token: &SnapshotToken) -> Result<Snapshot> {
        self.registry.open_at(token, &self.read_mark)
    }

    /// Re-reads the WAL from disk and reports which boundaries can still be
    /// opened.
    ///
    /// Best effort: commits that reached the log after this store was opened
    /// become visible, but boundaries older than the last checkpoint stay
    /// gone.
    pub fn recover_snapshots(&self) -> Result<SnapshotRange> {
        let _guard = self.commit_lock.lock();
        let report = self.wal.rescan()?;
        self.read_mark.advance_to(self.wal.last_sequence());
        self.emit(Event::Recovery {
            commits: report.commits,
            frames: report.frames,
            truncated_bytes: report.truncated_bytes,
            last_sequence: report.last_sequence,
            corruption: report.corruption,
        });
        Ok(self.registry.openable_range(self.read_mark.current()))
    }

    /// Image of `page` as of `boundary`.
    ///
    /// The boundary is not pinned. Prefer a [`Reader`] or a snapshot when
    /// checkpoints may run concurrently.
    pub fn read_at(&self, page: PageNumber, boundary: CommitSequence) -> Result<Bytes> {
        let range = self.registry.openable_range(self.read_mark.current());
        if !range.contains(boundary) {
            return Err(Error::InvalidToken(format!(
                "{} is outside the readable range {}..={}",
                boundary, range.oldest, range.newest
            )));
        }
        self.read_visible(page, boundary)
    }

    pub fn read_snapshot(&self, page: PageNumber, snapshot: &Snapshot) -> Result<Bytes> {
        self.check_owned(snapshot)?;
        if !snapshot.is_live() {
            return Err(Error::SnapshotReleased(snapshot.id()));
        }
        self.read_visible(page, snapshot.boundary())
    }

    /// Reads a user page after checking it is allocated at `boundary`.
    pub(crate) fn read_visible(&self, page: PageNumber, boundary: CommitSequence) -> Result<Bytes> {
        if page.is_meta() {
            return Err(StorageError::PageNotFound(page).into());
        }
        let meta = self.load_meta(boundary)?;
        if !meta.alloc.is_allocated(page) {
            return Err(StorageError::PageNotFound(page).into());
        }
        Ok(self.store.read(page, boundary, &self.wal)?)
    }

    /// Meta page as of `boundary`.
    pub(crate) fn load_meta(&self, boundary: CommitSequence) -> Result<MetaPage> {
        let data = self.store.read(PageNumber::META, boundary, &self.wal)?;
        let meta = MetaPage::decode(&data)?;
        if meta.header.store_id != self.store_id() {
            return Err(StorageError::Corruption(format!(
                "meta page at {} belongs to store {:016x}",
                boundary, meta.header.store_id
            ))
            .into());
        }
        Ok(meta)
    }

    /// Appends one commit and publishes it.
    ///
    /// The frames reach the index before the read mark moves, so a snapshot
    /// captured at the new mark always finds them.
    pub(crate) fn commit_frames(
        &self,
        txn: TransactionId,
        pages: &[(PageNumber, Bytes)],
    ) -> Result<CommitSequence> {
        let sequence = {
            let _guard = self.commit_lock.lock();
            let sequence = self.read_mark.current().next();
            self.wal.append(sequence, pages)?;
            self.read_mark.advance_to(sequence);
            sequence
        };

        debug!("{} committed as {}", txn, sequence);
        self.emit(Event::Commit {
            sequence,
            frames: pages.len(),
        });
        Ok(sequence)
    }

    /// Runs a checkpoint when the WAL has grown past the configured size.
    /// The commit that triggered it is already durable, so failures only
    /// reach the event sink.
    pub(crate) fn maybe_auto_checkpoint(&self) {
        let threshold = self.config.auto_checkpoint_frames;
        if threshold == 0 || self.wal.frame_count() < threshold {
            return;
        }
        if let Err(e) = self.run_checkpoint() {
            self.report_failure(FailureKind::AutoCheckpoint, e.to_string());
        }
    }

    /// Folds every frame no live snapshot needs into the base file and
    /// returns how many frames left the log.
    ///
    /// Blocks commits while it runs, never readers.
    pub fn checkpoint(&self) -> Result<usize> {
        self.run_checkpoint().map_err(|e| {
            self.report_failure(FailureKind::Checkpoint, e.to_string());
            e
        })
    }

    fn run_checkpoint(&self) -> Result<usize> {
        let _guard = self.commit_lock.lock();
        let min_retained = self.registry.begin_checkpoint(self.read_mark.current());
        let outcome = self.wal.checkpoint(min_retained, &self.store)?;

        self.emit(Event::Checkpoint {
            min_retained,
            merged_frames: outcome.merged_frames,
            merged_pages: outcome.merged_pages,
            retained_frames: outcome.retained_frames,
        });
        Ok(outcome.merged_frames)
    }

    pub fn min_retained(&self) -> CommitSequence {
        self.registry.min_retained(self.read_mark.current())
    }

    pub fn live_snapshots(&self) -> usize {
        self.registry.live_count()
    }

    /// Sets `flag` and returns its previous value.
    pub fn set_flag(&self, flag: DbFlag, enabled: bool) -> bool {
        let previous = self.flags.set(flag, enabled);
        debug!("{:?} set to {} (was {})", flag, enabled, previous);
        previous
    }

    pub fn flag(&self, flag: DbFlag) -> bool {
        self.flags.get(flag)
    }

    pub fn info(&self) -> Result<StoreInfo> {
        let read_mark = self.read_mark.current();
        let meta = self.load_meta(read_mark)?;
        Ok(StoreInfo {
            page_size: self.page_size(),
            store_id: self.store_id(),
            read_mark,
            page_count: meta.alloc.page_count(),
            free_pages: meta.alloc.free_count(),
            base_file_pages: self.store.base_pages()?,
            wal_frames: self.wal.frame_count(),
            wal_commits: self.wal.commit_count(),
            wal_bytes: self.wal.size(),
            base_sequence: self.wal.base_sequence(),
            checkpointed_through: self.registry.checkpointed_through(),
            live_snapshots: self.registry.live_count(),
        })
    }

    fn check_owned(&self, snapshot: &Snapshot) -> Result<()> {
        if !Arc::ptr_eq(snapshot.registry(), &self.registry) {
            return Err(Error::InvalidToken(format!(
                "snapshot {} belongs to store {:016x}",
                snapshot.id(),
                snapshot.store_id()
            )));
        }
        Ok(())
    }
}
