//! Read-only transactions.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use super::coordinator::TransactionCoordinator;
use super::id::TransactionId;
use crate::concurrency::CommitSequence;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::storage::PageNumber;

/// A transaction that only reads, at the boundary of the snapshot it holds.
///
/// Readers take no locks a writer or checkpoint waits on. Dropping a reader
/// without [`close`](Self::close) releases its snapshot as well.
pub struct Reader {
    id: TransactionId,
    coordinator: Arc<TransactionCoordinator>,
    snapshot: Snapshot,
}

impl Reader {
    pub(crate) fn new(
        id: TransactionId,
        coordinator: Arc<TransactionCoordinator>,
        snapshot: Snapshot,
    ) -> Self {
        debug!("{} reading at {}", id, snapshot.boundary());
        Self {
            id,
            coordinator,
            snapshot,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn boundary(&self) -> CommitSequence {
        self.snapshot.boundary()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn read(&self, page: PageNumber) -> Result<Bytes> {
        self.coordinator.read_visible(page, self.snapshot.boundary())
    }

    /// Ends the transaction and releases its snapshot.
    pub fn close(self) -> Result<()> {
        debug!("{} closed", self.id);
        self.coordinator.release(&self.snapshot)
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id)
            .field("boundary", &self.snapshot.boundary())
            .finish()
    }
}
