//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageNumber;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page not found: {0}")]
    PageNotFound(PageNumber),

    #[error("Invalid page size: expected at most {expected} bytes, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Free list is full: at most {capacity} free pages can be tracked")]
    FreeListFull { capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
