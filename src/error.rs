//! Engine-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::snapshot::SnapshotId;
use crate::storage::error::StorageError;
use crate::transaction::{TransactionId, TransactionState};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Write conflict: {holder} holds the writer slot")]
    WriteConflict { holder: TransactionId },

    #[error("Invalid snapshot token: {0}")]
    InvalidToken(String),

    #[error("Snapshot {0} was already released")]
    SnapshotReleased(SnapshotId),

    #[error("Transaction {id} is {state}")]
    InvalidState {
        id: TransactionId,
        state: TransactionState,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict { .. })
    }

    /// Whether the storage medium failed.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Io(_)))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
