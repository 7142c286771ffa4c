//! Snapshot handles and their portable tokens.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::SnapshotRegistry;
use crate::concurrency::CommitSequence;
use crate::error::{Error, Result};

/// Identifies one registered snapshot handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pinned, read-only view of the store as of a commit sequence.
///
/// The handle owns no frames. While it is registered, checkpoints keep every
/// frame it can see. Release it with
/// [`TransactionCoordinator::release`](crate::transaction::TransactionCoordinator::release);
/// dropping an unreleased handle releases it as well.
#[derive(Debug)]
pub struct Snapshot {
    id: SnapshotId,
    boundary: CommitSequence,
    store_id: u64,
    registry: Arc<SnapshotRegistry>,
}

impl Snapshot {
    pub(crate) fn new(
        id: SnapshotId,
        boundary: CommitSequence,
        store_id: u64,
        registry: Arc<SnapshotRegistry>,
    ) -> Self {
        Self {
            id,
            boundary,
            store_id,
            registry,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Every commit at or before this sequence is visible, nothing after it.
    pub fn boundary(&self) -> CommitSequence {
        self.boundary
    }

    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    pub fn is_live(&self) -> bool {
        self.registry.is_live(self.id)
    }

    /// Portable form of this snapshot, for [`open_at`](crate::transaction::TransactionCoordinator::open_at).
    pub fn token(&self) -> SnapshotToken {
        SnapshotToken {
            store_id: self.store_id,
            boundary: self.boundary,
        }
    }

    pub(crate) fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        // Already released handles report an error here; nothing to undo.
        let _ = self.registry.release(self.id);
    }
}

/// Orders two snapshots by boundary: `Less` means `a` sees strictly fewer
/// commits than `b`.
pub fn compare(a: &Snapshot, b: &Snapshot) -> Ordering {
    a.boundary.cmp(&b.boundary)
}

/// Serialized boundary plus the identity of the store it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotToken {
    pub store_id: u64,
    pub boundary: CommitSequence,
}

impl SnapshotToken {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::InvalidToken(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::InvalidToken(e.to_string()))
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{}", self.store_id, self.boundary.value())
    }
}

impl FromStr for SnapshotToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (store, boundary) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidToken(format!("missing ':' in {:?}", s)))?;
        let store_id = u64::from_str_radix(store, 16)
            .map_err(|e| Error::InvalidToken(format!("bad store id {:?}: {}", store, e)))?;
        let boundary = boundary
            .parse::<u64>()
            .map_err(|e| Error::InvalidToken(format!("bad boundary {:?}: {}", boundary, e)))?;

        Ok(SnapshotToken {
            store_id,
            boundary: CommitSequence::new(boundary),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bytes() {
        let token = SnapshotToken {
            store_id: 0xFEED,
            boundary: CommitSequence::new(42),
        };
        let bytes = token.to_bytes().unwrap();
        assert_eq!(SnapshotToken::from_bytes(&bytes).unwrap(), token);

        assert!(matches!(
            SnapshotToken::from_bytes(&bytes[..5]),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn test_token_text() {
        let token = SnapshotToken {
            store_id: 0xFEED,
            boundary: CommitSequence::new(42),
        };
        let text = token.to_string();
        assert_eq!(text, "000000000000feed:42");
        assert_eq!(text.parse::<SnapshotToken>().unwrap(), token);
    }

    #[test]
    fn test_token_text_errors() {
        for bad in ["", "feed", "xyz:1", "feed:", "feed:-1", "feed:abc"] {
            assert!(
                matches!(bad.parse::<SnapshotToken>(), Err(Error::InvalidToken(_))),
                "{:?} should not parse",
                bad
            );
        }
    }
}
