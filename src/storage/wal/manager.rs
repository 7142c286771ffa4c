//! WAL manager implementation.
//!
//! The WAL manager appends commits to the log file, maintains the frame
//! index, serves versioned page reads, and folds old frames back into the
//! base file on checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};

use super::frame::{encode_commit, WalHeader, WAL_HEADER_SIZE};
use super::index::{FrameIndex, FrameLocation};
use super::reader::{scan, RecoveryReport};
use crate::concurrency::CommitSequence;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageNumber;
use crate::storage::page_store::PageStore;

/// Suffix appended to the database path to name its log.
const WAL_FILE_SUFFIX: &str = "-wal";

/// Suffix of the scratch file a checkpoint writes before renaming it over
/// the live log.
const REWRITE_SUFFIX: &str = "-rewrite";

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file.
    pub path: PathBuf,
    /// Page size of the store the log belongs to.
    pub page_size: usize,
    /// Identity of the store the log belongs to.
    pub store_id: u64,
    /// Whether to fsync the log on every commit.
    pub sync_on_commit: bool,
    /// Checkpoint horizon recorded in the base file. A fresh or reset log
    /// starts from it, and no log header may claim less.
    pub horizon: CommitSequence,
}

impl WalConfig {
    pub fn for_database(db_path: &Path, page_size: usize, store_id: u64) -> Self {
        WalConfig {
            path: wal_path(db_path),
            page_size,
            store_id,
            sync_on_commit: true,
            horizon: CommitSequence::ZERO,
        }
    }
}

/// Log file path for a database file.
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(WAL_FILE_SUFFIX);
    PathBuf::from(name)
}

/// Result of folding frames into the base file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// Frames removed from the log.
    pub merged_frames: usize,
    /// Distinct pages written to the base file.
    pub merged_pages: usize,
    /// Frames still in the log.
    pub retained_frames: usize,
    /// New base sequence recorded in the log header.
    pub base_sequence: CommitSequence,
}

struct WalState {
    file: Mutex<File>,
    header: WalHeader,
    index: FrameIndex,
    /// Offset at which the next commit is appended.
    end: u64,
}

impl WalState {
    fn read_payload(&self, location: FrameLocation, page_size: usize) -> StorageResult<Bytes> {
        let mut buf = vec![0u8; page_size];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(location.offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// WAL manager for handling write-ahead logging.
pub struct WalManager {
    config: WalConfig,
    state: RwLock<WalState>,
}

impl WalManager {
    /// Creates an empty log, replacing whatever was at the path.
    pub fn create(config: WalConfig) -> StorageResult<Self> {
        let header = WalHeader {
            page_size: config.page_size,
            store_id: config.store_id,
            base_sequence: config.horizon,
        };
        let file = write_fresh_log(&config.path, &header, &[])?;

        Ok(WalManager {
            config,
            state: RwLock::new(WalState {
                file: Mutex::new(file),
                header,
                index: FrameIndex::new(),
                end: WAL_HEADER_SIZE as u64,
            }),
        })
    }

    /// Opens the log and replays every complete commit into the frame index.
    ///
    /// A missing or unreadable header resets the log. A torn tail is
    /// truncated. Both are reported through [`RecoveryReport::corruption`].
    /// A log written for a different page size or store is an error.
    pub fn open(config: WalConfig) -> StorageResult<(Self, RecoveryReport)> {
        if !config.path.exists() {
            debug!("No WAL at {:?}, starting an empty one", config.path);
            let report = RecoveryReport {
                last_sequence: config.horizon,
                ..Default::default()
            };
            return Ok((Self::create(config)?, report));
        }

        let (state, report) = Self::recover_state(&config, config.horizon)?;
        Ok((
            WalManager {
                config,
                state: RwLock::new(state),
            },
            report,
        ))
    }

    /// Replays the log at `config.path`. `horizon` is the lowest base
    /// sequence the result may carry.
    fn recover_state(
        config: &WalConfig,
        horizon: CommitSequence,
    ) -> StorageResult<(WalState, RecoveryReport)> {
        let mut file = OpenOptions::new().read(true).write(true).open(&config.path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let scanned = match scan(&buf) {
            Ok(scanned) => scanned,
            Err(StorageError::Corruption(reason)) => {
                warn!("Resetting WAL {:?}: {}", config.path, reason);
                let header = WalHeader {
                    page_size: config.page_size,
                    store_id: config.store_id,
                    base_sequence: horizon,
                };
                let file = write_fresh_log(&config.path, &header, &[])?;
                let report = RecoveryReport {
                    truncated_bytes: buf.len() as u64,
                    last_sequence: horizon,
                    corruption: Some(reason),
                    ..Default::default()
                };
                let state = WalState {
                    file: Mutex::new(file),
                    header,
                    index: FrameIndex::new(),
                    end: WAL_HEADER_SIZE as u64,
                };
                return Ok((state, report));
            }
            Err(e) => return Err(e),
        };

        if scanned.header.page_size != config.page_size {
            return Err(StorageError::Corruption(format!(
                "WAL page size {} does not match store page size {}",
                scanned.header.page_size, config.page_size
            )));
        }
        if scanned.header.store_id != config.store_id {
            return Err(StorageError::Corruption(format!(
                "WAL belongs to store {:016x}, not {:016x}",
                scanned.header.store_id, config.store_id
            )));
        }

        let truncated_bytes = buf.len() as u64 - scanned.valid_end;
        if truncated_bytes > 0 {
            warn!(
                "Truncating {} bytes of WAL {:?}: {}",
                truncated_bytes,
                config.path,
                scanned.problem.as_deref().unwrap_or("trailing data")
            );
            file.set_len(scanned.valid_end)?;
            file.sync_all()?;
        }

        // A checkpoint records its horizon in the base file before it
        // touches any page, so the base file may be ahead of this header.
        let header = WalHeader {
            base_sequence: scanned.header.base_sequence.max(horizon),
            ..scanned.header
        };

        let mut index = FrameIndex::new();
        let mut report = RecoveryReport {
            truncated_bytes,
            last_sequence: header.base_sequence,
            corruption: scanned.problem,
            ..Default::default()
        };
        for commit in &scanned.commits {
            index.insert_commit(commit.sequence, &commit.frames);
            report.commits += 1;
            report.frames += commit.frames.len();
            report.last_sequence = report.last_sequence.max(commit.sequence);
        }

        let state = WalState {
            file: Mutex::new(file),
            header,
            index,
            end: scanned.valid_end,
        };
        Ok((state, report))
    }

    /// Re-reads the log from disk and rebuilds the frame index.
    ///
    /// Callers must hold off commits and checkpoints while this runs.
    pub fn rescan(&self) -> StorageResult<RecoveryReport> {
        let horizon = self.base_sequence().max(self.config.horizon);
        let (fresh, report) = Self::recover_state(&self.config, horizon)?;
        *self.state.write() = fresh;
        Ok(report)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Appends all frames of one commit.
    ///
    /// The frames become visible to [`lookup`](Self::lookup) only after the
    /// write (and fsync, when configured) succeeded. On failure the file is
    /// cut back to its previous length.
    pub fn append(
        &self,
        sequence: CommitSequence,
        pages: &[(PageNumber, Bytes)],
    ) -> StorageResult<()> {
        if pages.is_empty() {
            return Ok(());
        }
        for (_, data) in pages {
            if data.len() != self.config.page_size {
                return Err(StorageError::InvalidPageSize {
                    expected: self.config.page_size,
                    actual: data.len(),
                });
            }
        }

        let encoded = encode_commit(sequence, pages);

        let state = self.state.upgradable_read();
        let start = state.end;
        {
            let mut file = state.file.lock();
            let written = write_at(&mut file, start, &encoded.bytes, self.config.sync_on_commit);
            if let Err(e) = written {
                warn!("WAL append for {} failed: {}", sequence, e);
                // Best effort: the index never saw these bytes, and recovery
                // would discard a torn commit anyway.
                let _ = file.set_len(start);
                return Err(e.into());
            }
        }

        let frames: Vec<_> = encoded
            .frames
            .iter()
            .map(|&(page, offset)| (page, start + offset as u64))
            .collect();

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        state.index.insert_commit(sequence, &frames);
        state.end = start + encoded.bytes.len() as u64;

        debug!(
            "Appended {} frames for {} ({} bytes)",
            frames.len(),
            sequence,
            encoded.bytes.len()
        );
        Ok(())
    }

    pub fn lookup(&self, page: PageNumber, boundary: CommitSequence) -> Option<FrameLocation> {
        self.state.read().index.lookup(page, boundary)
    }

    /// Newest image of `page` visible at `boundary`, if the log has one.
    pub fn read_frame(
        &self,
        page: PageNumber,
        boundary: CommitSequence,
    ) -> StorageResult<Option<Bytes>> {
        let state = self.state.read();
        match state.index.lookup(page, boundary) {
            Some(location) => Ok(Some(state.read_payload(location, self.config.page_size)?)),
            None => Ok(None),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.state.read().index.frame_count()
    }

    pub fn commit_count(&self) -> usize {
        self.state.read().index.commit_count()
    }

    /// Highest sequence already folded into the base file.
    pub fn base_sequence(&self) -> CommitSequence {
        self.state.read().header.base_sequence
    }

    /// Highest sequence known to the log, counting checkpointed ones.
    pub fn last_sequence(&self) -> CommitSequence {
        let state = self.state.read();
        state
            .index
            .last_sequence()
            .unwrap_or(state.header.base_sequence)
            .max(state.header.base_sequence)
    }

    /// Size of the log file in bytes.
    pub fn size(&self) -> u64 {
        self.state.read().end
    }

    /// Folds every frame older than `min_retained` into `store` and rewrites
    /// the log with only the frames at or after it.
    ///
    /// Callers must hold off commits while this runs. Readers keep working:
    /// the frame index is swapped only once the new log is durable, and
    /// pages a reader still resolves through the base file are never among
    /// the ones rewritten.
    pub fn checkpoint(
        &self,
        min_retained: CommitSequence,
        store: &PageStore,
    ) -> StorageResult<CheckpointOutcome> {
        let page_size = self.config.page_size;

        let (header, rewrite, merged_frames, merged_pages) = {
            let state = self.state.read();
            let plan = state.index.merge_plan(min_retained);
            let merged_frames = state.index.frames_before(min_retained);
            if merged_frames == 0 {
                return Ok(CheckpointOutcome {
                    merged_frames: 0,
                    merged_pages: 0,
                    retained_frames: state.index.frame_count(),
                    base_sequence: state.header.base_sequence,
                });
            }

            let base_sequence = plan
                .iter()
                .map(|(_, location)| location.sequence)
                .fold(state.header.base_sequence, CommitSequence::max);

            // Boundaries below the new horizon stop being readable once the
            // first merged page lands, so the horizon must be durable first.
            if base_sequence > store.horizon() {
                store.set_horizon(base_sequence)?;
            }
            for (page, location) in &plan {
                let data = state.read_payload(*location, page_size)?;
                store.write_base(*page, data)?;
            }
            store.sync()?;

            let mut rewrite = Vec::new();
            for (sequence, frames) in state.index.retained_commits(min_retained) {
                let mut pages = Vec::with_capacity(frames.len());
                for (page, offset) in frames {
                    let location = FrameLocation { sequence, offset };
                    pages.push((page, state.read_payload(location, page_size)?));
                }
                rewrite.push((sequence, pages));
            }

            let header = WalHeader {
                base_sequence,
                ..state.header
            };
            (header, rewrite, merged_frames, plan.len())
        };

        let scratch = rewrite_path(&self.config.path);
        let mut index = FrameIndex::new();
        let mut body = Vec::new();
        for (sequence, pages) in &rewrite {
            let encoded = encode_commit(*sequence, pages);
            let start = (WAL_HEADER_SIZE + body.len()) as u64;
            let frames: Vec<_> = encoded
                .frames
                .iter()
                .map(|&(page, offset)| (page, start + offset as u64))
                .collect();
            index.insert_commit(*sequence, &frames);
            body.extend_from_slice(&encoded.bytes);
        }

        write_fresh_log(&scratch, &header, &body)?;
        std::fs::rename(&scratch, &self.config.path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.config.path)?;

        let retained_frames = index.frame_count();
        {
            let mut state = self.state.write();
            *state = WalState {
                file: Mutex::new(file),
                header,
                index,
                end: (WAL_HEADER_SIZE + body.len()) as u64,
            };
        }

        info!(
            "Checkpointed {} frames ({} pages) below {}, {} frames retained",
            merged_frames, merged_pages, min_retained, retained_frames
        );

        Ok(CheckpointOutcome {
            merged_frames,
            merged_pages,
            retained_frames,
            base_sequence: header.base_sequence,
        })
    }
}

impl WalManager {
    /// Swaps the log's file handle, e.g. for a read-only one.
    #[cfg(test)]
    pub(crate) fn replace_file(&self, file: File) -> File {
        let state = self.state.read();
        let mut current = state.file.lock();
        std::mem::replace(&mut *current, file)
    }
}

fn rewrite_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(REWRITE_SUFFIX);
    PathBuf::from(name)
}

fn write_at(file: &mut File, offset: u64, data: &[u8], sync: bool) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Writes a complete log (header plus already encoded commits) and syncs it.
fn write_fresh_log(path: &Path, header: &WalHeader, body: &[u8]) -> StorageResult<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&header.encode())?;
    file.write_all(body)?;
    file.sync_all()?;
    Ok(file)
}
