//! snapdb: an embedded page store with snapshot isolation on top of a
//! write-ahead log.
//!
//! ```no_run
//! use snapdb::{Config, Database, PageNumber};
//!
//! # fn main() -> snapdb::Result<()> {
//! let db = Database::open_or_create("data.db".as_ref(), Config::default())?;
//!
//! let mut writer = db.begin_write()?;
//! let page = writer.allocate()?;
//! writer.write(page, b"hello")?;
//! writer.commit()?;
//!
//! let reader = db.begin_read();
//! assert_eq!(&reader.read(page)?[..5], b"hello");
//! reader.close()?;
//! # let _ = PageNumber::META;
//! # Ok(())
//! # }
//! ```

pub mod concurrency;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod storage;
pub mod transaction;

pub use concurrency::CommitSequence;
pub use config::{Config, ConfigBuilder, DbFlag, WriterPolicy};
pub use database::Database;
pub use error::{Error, Result};
pub use events::{Event, EventSink, FailureKind, LogSink, NullSink};
pub use snapshot::{Snapshot, SnapshotRange, SnapshotToken};
pub use storage::{PageNumber, StorageError};
pub use transaction::{Reader, StoreInfo, Writer};
