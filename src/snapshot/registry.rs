//! Registry of live snapshots.
//!
//! Tracks a reference count per boundary so checkpoints know the oldest
//! sequence that must stay in the WAL, and the checkpoint horizon below
//! which old boundaries can no longer be reopened.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::handle::{Snapshot, SnapshotId, SnapshotToken};
use crate::concurrency::{CommitSequence, ReadMark};
use crate::error::{Error, Result};

/// Sequences a snapshot may currently be opened at, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRange {
    pub oldest: CommitSequence,
    pub newest: CommitSequence,
}

impl SnapshotRange {
    pub fn contains(&self, boundary: CommitSequence) -> bool {
        self.oldest <= boundary && boundary <= self.newest
    }
}

#[derive(Debug)]
struct RegistryState {
    next_id: u64,
    live: HashMap<SnapshotId, CommitSequence>,
    boundaries: BTreeMap<CommitSequence, usize>,
    /// Highest sequence a checkpoint may have folded into the base file.
    checkpointed_through: CommitSequence,
}

impl RegistryState {
    fn register(&mut self, boundary: CommitSequence) -> SnapshotId {
        self.next_id += 1;
        let id = SnapshotId(self.next_id);
        self.live.insert(id, boundary);
        *self.boundaries.entry(boundary).or_insert(0) += 1;
        id
    }
}

#[derive(Debug)]
pub struct SnapshotRegistry {
    store_id: u64,
    state: Mutex<RegistryState>,
}

impl SnapshotRegistry {
    pub fn new(store_id: u64, checkpointed_through: CommitSequence) -> Self {
        Self {
            store_id,
            state: Mutex::new(RegistryState {
                next_id: 0,
                live: HashMap::new(),
                boundaries: BTreeMap::new(),
                checkpointed_through,
            }),
        }
    }

    /// Pins the current read mark. Reading the mark and registering happen
    /// under one lock, so a concurrent checkpoint either sees the new
    /// snapshot or finished before the boundary existed.
    pub fn capture(self: &Arc<Self>, read_mark: &ReadMark) -> Snapshot {
        let mut state = self.state.lock();
        let boundary = read_mark.current();
        let id = state.register(boundary);
        debug!("Captured snapshot {} at {}", id, boundary);
        Snapshot::new(id, boundary, self.store_id, Arc::clone(self))
    }

    /// Registers another handle on the boundary of a live snapshot.
    pub fn share(self: &Arc<Self>, snapshot: &Snapshot) -> Result<Snapshot> {
        let mut state = self.state.lock();
        if !state.live.contains_key(&snapshot.id()) {
            return Err(Error::SnapshotReleased(snapshot.id()));
        }
        let id = state.register(snapshot.boundary());
        Ok(Snapshot::new(id, snapshot.boundary(), self.store_id, Arc::clone(self)))
    }

    /// Rebuilds a handle from a token.
    pub fn open_at(
        self: &Arc<Self>,
        token: &SnapshotToken,
        read_mark: &ReadMark,
    ) -> Result<Snapshot> {
        let mut state = self.state.lock();

        if token.store_id != self.store_id {
            return Err(Error::InvalidToken(format!(
                "token belongs to store {:016x}, not {:016x}",
                token.store_id, self.store_id
            )));
        }
        let newest = read_mark.current();
        if token.boundary > newest {
            return Err(Error::InvalidToken(format!(
                "{} has not been committed (newest is {})",
                token.boundary, newest
            )));
        }
        if token.boundary < state.checkpointed_through {
            return Err(Error::InvalidToken(format!(
                "{} was checkpointed away (oldest openable is {})",
                token.boundary, state.checkpointed_through
            )));
        }

        let id = state.register(token.boundary);
        debug!("Opened snapshot {} at {}", id, token.boundary);
        Ok(Snapshot::new(id, token.boundary, self.store_id, Arc::clone(self)))
    }

    /// Unpins a snapshot. A second release of the same handle fails and
    /// leaves the counts untouched.
    pub fn release(&self, id: SnapshotId) -> Result<()> {
        let mut state = self.state.lock();
        let boundary = state.live.remove(&id).ok_or(Error::SnapshotReleased(id))?;

        if let Some(count) = state.boundaries.get_mut(&boundary) {
            *count -= 1;
            if *count == 0 {
                state.boundaries.remove(&boundary);
            }
        }
        debug!("Released snapshot {} at {}", id, boundary);
        Ok(())
    }

    pub fn is_live(&self, id: SnapshotId) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of live handles pinned at exactly `boundary`.
    pub fn refcount(&self, boundary: CommitSequence) -> usize {
        self.state
            .lock()
            .boundaries
            .get(&boundary)
            .copied()
            .unwrap_or(0)
    }

    /// Oldest sequence a checkpoint must keep: the lowest live boundary, or
    /// the one after `read_mark` when nothing is pinned.
    pub fn min_retained(&self, read_mark: CommitSequence) -> CommitSequence {
        Self::min_retained_locked(&self.state.lock(), read_mark)
    }

    fn min_retained_locked(state: &RegistryState, read_mark: CommitSequence) -> CommitSequence {
        state
            .boundaries
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| read_mark.next())
    }

    /// Fixes the retention boundary for a checkpoint that is about to run and
    /// moves the horizon so older tokens are refused from now on.
    pub fn begin_checkpoint(&self, read_mark: CommitSequence) -> CommitSequence {
        let mut state = self.state.lock();
        let min = Self::min_retained_locked(&state, read_mark);
        state.checkpointed_through = state.checkpointed_through.max(min.prev());
        min
    }

    pub fn checkpointed_through(&self) -> CommitSequence {
        self.state.lock().checkpointed_through
    }

    pub fn openable_range(&self, read_mark: CommitSequence) -> SnapshotRange {
        SnapshotRange {
            oldest: self.checkpointed_through(),
            newest: read_mark,
        }
    }
}
