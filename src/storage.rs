//! Storage layer implementation for snapdb.
//!
//! This module provides persistent page storage. Key components:
//!
//! - **PageNumber**: identifies fixed-size pages; page 0 is the meta page
//! - **PageManager**: reads and writes pages of the base file
//! - **PageCache**: in-memory cache of base images with LRU eviction
//! - **WalManager**: the write-ahead log holding every committed page version
//!   that has not been checkpointed yet
//! - **PageStore**: versioned reads (WAL first, then base image)

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod page_store;
pub mod wal;

pub use buffer::PageCache;
pub use disk::PageManager;
pub use error::{StorageError, StorageResult};
pub use page::{PageNumber, DEFAULT_PAGE_SIZE};
pub use page_store::PageStore;
pub use wal::{RecoveryReport, WalManager};
