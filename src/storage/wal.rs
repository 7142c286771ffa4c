//! Write-ahead log.
//!
//! - Frame and header encoding with per-frame and per-commit checksums
//! - The frame index that resolves a page to its newest visible version
//! - Appending commits, checkpointing into the base file
//! - Recovery scanning with truncation of torn commits

pub mod frame;
pub mod index;
pub mod manager;
pub mod reader;

pub use index::{FrameIndex, FrameLocation};
pub use manager::{wal_path, CheckpointOutcome, WalConfig, WalManager};
pub use reader::RecoveryReport;
