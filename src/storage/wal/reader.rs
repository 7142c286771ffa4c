//! WAL scanning for recovery.
//!
//! A commit is accepted only when every one of its frames checks out and
//! its trailer (frame count and commit checksum) matches. Scanning stops at
//! the first frame that does not; everything from there on is garbage left
//! by a torn write and gets truncated by the caller.

use byteorder::{BigEndian, ByteOrder};

use super::frame::{
    split_page_field, WalHeader, COMMIT_TRAILER_SIZE, FRAME_CHECKSUM_SIZE, FRAME_HEADER_SIZE,
    WAL_HEADER_SIZE,
};
use crate::concurrency::CommitSequence;
use crate::storage::error::StorageResult;
use crate::storage::page::PageNumber;

/// One verified commit found in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCommit {
    pub sequence: CommitSequence,
    /// Page number and payload offset within the file.
    pub frames: Vec<(PageNumber, u64)>,
}

#[derive(Debug)]
pub struct WalScan {
    pub header: WalHeader,
    pub commits: Vec<ScannedCommit>,
    /// Offset just past the last verified commit.
    pub valid_end: u64,
    /// Why scanning stopped early, when it did.
    pub problem: Option<String>,
}

/// Outcome of replaying the WAL at open (or on an explicit rescan).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub commits: usize,
    pub frames: usize,
    pub truncated_bytes: u64,
    pub last_sequence: CommitSequence,
    /// Set when the log had to be reset or truncated.
    pub corruption: Option<String>,
}

/// Scans a whole WAL image. Fails only when the header itself is unusable.
pub fn scan(buf: &[u8]) -> StorageResult<WalScan> {
    let header = WalHeader::decode(buf)?;
    let page_size = header.page_size;

    let mut commits = Vec::new();
    let mut pos = WAL_HEADER_SIZE;
    let mut valid_end = pos;
    let mut last = header.base_sequence;
    let mut problem = None;

    let mut pending: Vec<(PageNumber, u64)> = Vec::new();
    let mut pending_seq: Option<CommitSequence> = None;
    let mut hasher = crc32fast::Hasher::new();

    loop {
        let frame_end = pos + FRAME_HEADER_SIZE + page_size + FRAME_CHECKSUM_SIZE;
        if frame_end > buf.len() {
            if pos < buf.len() {
                problem = Some(format!("incomplete frame at offset {}", pos));
            } else if !pending.is_empty() {
                problem = Some(format!("commit without marker at offset {}", valid_end));
            }
            break;
        }

        let (page, is_commit) = split_page_field(BigEndian::read_u32(&buf[pos..pos + 4]));
        let sequence = CommitSequence::new(BigEndian::read_u64(&buf[pos + 4..pos + 12]));
        let checksum_at = frame_end - FRAME_CHECKSUM_SIZE;
        let expected = BigEndian::read_u32(&buf[checksum_at..frame_end]);
        if crc32fast::hash(&buf[pos..checksum_at]) != expected {
            problem = Some(format!("frame checksum mismatch at offset {}", pos));
            break;
        }

        match pending_seq {
            Some(seq) if seq != sequence => {
                problem = Some(format!(
                    "{} interleaved with {} at offset {}",
                    sequence, seq, pos
                ));
                break;
            }
            None if sequence <= last => {
                problem = Some(format!(
                    "{} does not follow {} at offset {}",
                    sequence, last, pos
                ));
                break;
            }
            _ => {}
        }

        pending_seq = Some(sequence);
        pending.push((page, (pos + FRAME_HEADER_SIZE) as u64));
        hasher.update(&buf[pos..frame_end]);
        pos = frame_end;

        if !is_commit {
            continue;
        }

        if pos + COMMIT_TRAILER_SIZE > buf.len() {
            problem = Some(format!("incomplete commit trailer at offset {}", pos));
            break;
        }
        let frame_count = BigEndian::read_u32(&buf[pos..pos + 4]) as usize;
        let commit_checksum = BigEndian::read_u32(&buf[pos + 4..pos + 8]);
        let computed = std::mem::replace(&mut hasher, crc32fast::Hasher::new()).finalize();
        if frame_count != pending.len() || commit_checksum != computed {
            problem = Some(format!("commit checksum mismatch at offset {}", pos));
            break;
        }
        pos += COMMIT_TRAILER_SIZE;

        commits.push(ScannedCommit {
            sequence,
            frames: std::mem::take(&mut pending),
        });
        last = sequence;
        pending_seq = None;
        valid_end = pos;
    }

    Ok(WalScan {
        header,
        commits,
        valid_end: valid_end as u64,
        problem,
    })
}
