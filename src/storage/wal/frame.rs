//! WAL file header and frame codec.
//!
//! Header (32 bytes):
//!
//! ```text
//! Offset  Size  Description
//!   0       4   Magic 0x534E5741
//!   4       4   Format version
//!   8       4   Page size
//!  12       8   Store identity
//!  20       8   Base sequence (highest sequence folded into the base file)
//!  28       4   CRC-32 of bytes 0..28
//! ```
//!
//! Frame:
//!
//! ```text
//! [PageNumber:4][CommitSequence:8][PageBytes:N][FrameChecksum:4]
//! ```
//!
//! The last frame of a commit has bit 31 of the page number set and is
//! followed by `[FrameCount:4][CommitChecksum:4]`, where the commit checksum
//! covers every encoded frame of that commit.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use bytes::Bytes;

use crate::concurrency::CommitSequence;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageNumber;

pub const WAL_MAGIC: u32 = 0x534E_5741;
pub const WAL_VERSION: u32 = 1;
pub const WAL_HEADER_SIZE: usize = 32;

pub const FRAME_HEADER_SIZE: usize = 12;
pub const FRAME_CHECKSUM_SIZE: usize = 4;
pub const COMMIT_TRAILER_SIZE: usize = 8;

pub const COMMIT_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub page_size: usize,
    pub store_id: u64,
    pub base_sequence: CommitSequence,
}

impl WalHeader {
    pub fn encode(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], WAL_MAGIC);
        BigEndian::write_u32(&mut buf[4..8], WAL_VERSION);
        BigEndian::write_u32(&mut buf[8..12], self.page_size as u32);
        BigEndian::write_u64(&mut buf[12..20], self.store_id);
        BigEndian::write_u64(&mut buf[20..28], self.base_sequence.value());
        let crc = crc32fast::hash(&buf[0..28]);
        BigEndian::write_u32(&mut buf[28..32], crc);
        buf
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(StorageError::Corruption(format!(
                "WAL header too small: {} bytes",
                buf.len()
            )));
        }
        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != WAL_MAGIC {
            return Err(StorageError::Corruption(format!(
                "invalid WAL magic: {:#010x}",
                magic
            )));
        }
        let version = BigEndian::read_u32(&buf[4..8]);
        if version != WAL_VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported WAL version: {}",
                version
            )));
        }
        let crc = BigEndian::read_u32(&buf[28..32]);
        if crc != crc32fast::hash(&buf[0..28]) {
            return Err(StorageError::Corruption(
                "WAL header checksum mismatch".to_string(),
            ));
        }

        Ok(Self {
            page_size: BigEndian::read_u32(&buf[8..12]) as usize,
            store_id: BigEndian::read_u64(&buf[12..20]),
            base_sequence: CommitSequence::new(BigEndian::read_u64(&buf[20..28])),
        })
    }
}

/// Encoded size of one frame, without the commit trailer.
pub fn frame_size(page_size: usize) -> usize {
    FRAME_HEADER_SIZE + page_size + FRAME_CHECKSUM_SIZE
}

/// One commit worth of frames, ready to be appended as a single write.
#[derive(Debug)]
pub struct EncodedCommit {
    pub bytes: Vec<u8>,
    /// Page number and offset of its payload within `bytes`, in write order.
    pub frames: Vec<(PageNumber, usize)>,
}

/// Encodes all frames of commit `sequence`. The last entry carries the
/// commit marker. `pages` must not be empty and every image must be exactly
/// one page long.
pub fn encode_commit(sequence: CommitSequence, pages: &[(PageNumber, Bytes)]) -> EncodedCommit {
    debug_assert!(!pages.is_empty());

    let total: usize = pages
        .iter()
        .map(|(_, data)| FRAME_HEADER_SIZE + data.len() + FRAME_CHECKSUM_SIZE)
        .sum::<usize>()
        + COMMIT_TRAILER_SIZE;
    let mut bytes = Vec::with_capacity(total);
    let mut frames = Vec::with_capacity(pages.len());
    let mut commit_hasher = crc32fast::Hasher::new();

    for (i, (page, data)) in pages.iter().enumerate() {
        let start = bytes.len();
        let mut page_field = page.0;
        if i + 1 == pages.len() {
            page_field |= COMMIT_FLAG;
        }

        // Writes into a Vec cannot fail.
        let _ = bytes.write_u32::<BigEndian>(page_field);
        let _ = bytes.write_u64::<BigEndian>(sequence.value());
        frames.push((*page, bytes.len()));
        bytes.extend_from_slice(data);

        let checksum = crc32fast::hash(&bytes[start..]);
        let _ = bytes.write_u32::<BigEndian>(checksum);
        commit_hasher.update(&bytes[start..]);
    }

    let _ = bytes.write_u32::<BigEndian>(pages.len() as u32);
    let _ = bytes.write_u32::<BigEndian>(commit_hasher.finalize());

    EncodedCommit { bytes, frames }
}

/// Splits the 4-byte page field into page number and commit flag.
pub fn split_page_field(field: u32) -> (PageNumber, bool) {
    (PageNumber(field & !COMMIT_FLAG), field & COMMIT_FLAG != 0)
}
