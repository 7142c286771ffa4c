//! Diagnostic events.
//!
//! The engine reports commits, checkpoints, recovery and failures to an
//! [`EventSink`] supplied through [`Config`](crate::config::Config).
//! Delivery is fire and forget: nothing in the engine depends on what a sink
//! does with an event.

use std::fmt::{self, Debug};

use log::{error, info, warn};

use crate::concurrency::CommitSequence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Commit {
        sequence: CommitSequence,
        frames: usize,
    },
    Checkpoint {
        min_retained: CommitSequence,
        merged_frames: usize,
        merged_pages: usize,
        retained_frames: usize,
    },
    Recovery {
        commits: usize,
        frames: usize,
        truncated_bytes: u64,
        last_sequence: CommitSequence,
        corruption: Option<String>,
    },
    /// An operation failed. The caller also sees the error, except for
    /// automatic checkpoints, which have no caller.
    Error {
        kind: FailureKind,
        message: String,
    },
}

/// Where an [`Event::Error`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A commit did not reach the WAL; the writer was aborted.
    CommitAborted,
    /// A writer read failed on the storage medium and was aborted.
    WriterIo,
    /// A checkpoint stopped before swapping the WAL.
    Checkpoint,
    /// A checkpoint run after a commit failed.
    AutoCheckpoint,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::CommitAborted => "commit aborted",
            FailureKind::WriterIo => "writer I/O",
            FailureKind::Checkpoint => "checkpoint",
            FailureKind::AutoCheckpoint => "automatic checkpoint",
        };
        f.write_str(name)
    }
}

pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: &Event);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Commit { sequence, frames } => {
                info!("Committed {} with {} frames", sequence, frames);
            }
            Event::Checkpoint {
                min_retained,
                merged_frames,
                merged_pages,
                retained_frames,
            } => {
                info!(
                    "Checkpoint below {}: merged {} frames into {} pages, {} retained",
                    min_retained, merged_frames, merged_pages, retained_frames
                );
            }
            Event::Recovery {
                commits,
                frames,
                truncated_bytes,
                last_sequence,
                corruption,
            } => match corruption {
                Some(reason) => warn!(
                    "Recovered {} commits ({} frames) up to {}, discarded {} bytes: {}",
                    commits, frames, last_sequence, truncated_bytes, reason
                ),
                None => info!(
                    "Recovered {} commits ({} frames) up to {}",
                    commits, frames, last_sequence
                ),
            },
            Event::Error { kind, message } => error!("{}: {}", kind, message),
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Keeps every event for inspection.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &Event) {
            self.events.lock().push(event.clone());
        }
    }
}
