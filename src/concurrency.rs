//! Concurrency control module.
//!
//! - Commit sequence numbers and the shared read mark
//! - The single writer slot

pub mod sequence;
pub mod writer_slot;

pub use sequence::{CommitSequence, ReadMark};
pub use writer_slot::WriterSlot;
