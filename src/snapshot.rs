//! Snapshot management.
//!
//! A snapshot is a commit-sequence boundary plus a retention obligation
//! recorded in the [`SnapshotRegistry`]. Reads at a boundary resolve each
//! page to its newest version committed at or before it.

pub mod handle;
pub mod registry;

pub use handle::{compare, Snapshot, SnapshotId, SnapshotToken};
pub use registry::{SnapshotRange, SnapshotRegistry};
