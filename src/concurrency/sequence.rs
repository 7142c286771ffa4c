//! Commit sequence numbers and the read mark.
//!
//! Every committed writer gets the next [`CommitSequence`]. The [`ReadMark`]
//! publishes the highest one; snapshots capture it as their boundary.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing commit counter. Sequence 0 is the empty store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CommitSequence(pub u64);

impl CommitSequence {
    pub const ZERO: CommitSequence = CommitSequence(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The sequence before this one, saturating at zero.
    pub fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl std::fmt::Display for CommitSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seq {}", self.0)
    }
}

/// Highest committed sequence, shared by the coordinator and snapshot capture.
#[derive(Debug)]
pub struct ReadMark {
    value: AtomicU64,
}

impl ReadMark {
    pub fn new(start: CommitSequence) -> Self {
        Self {
            value: AtomicU64::new(start.0),
        }
    }

    pub fn current(&self) -> CommitSequence {
        CommitSequence(self.value.load(Ordering::Acquire))
    }

    /// Moves the mark forward to `seq`. Never moves it backwards.
    pub fn advance_to(&self, seq: CommitSequence) {
        let mut current = self.value.load(Ordering::Acquire);
        while seq.0 > current {
            match self.value.compare_exchange(
                current,
                seq.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for ReadMark {
    fn default() -> Self {
        Self::new(CommitSequence::ZERO)
    }
}
