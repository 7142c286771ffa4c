//! Transactions.
//!
//! - [`Reader`]: read-only view pinned to a snapshot, never blocks
//! - [`Writer`]: holds the single writer slot and buffers page images
//!   privately until commit
//! - [`TransactionCoordinator`]: owns the shared state both work against

pub mod coordinator;
pub mod id;
pub mod reader;
pub mod state;
pub mod writer;

pub use coordinator::{StoreInfo, TransactionCoordinator};
pub use id::{TransactionId, TransactionIdGenerator};
pub use reader::Reader;
pub use state::TransactionState;
pub use writer::Writer;
