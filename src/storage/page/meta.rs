//! Meta page (page 0) layout.
//!
//! ```text
//! Offset  Size  Description
//!   0       8   Magic "SNAPDB\0\x01"
//!   8       4   Page size in bytes
//!  12       8   Store identity
//!  20       8   Checkpoint horizon (base file copy only)
//!  28       4   Page count (including the meta page)
//!  32       4   Number of free list entries
//!  36       4   Reserved
//!  40     4*n   Free page numbers, ascending
//! ```
//!
//! Magic, page size and store identity never change after creation. The
//! allocator part is rewritten by every commit that allocates or frees pages.
//! The checkpoint horizon is owned by the base file: checkpoints update it in
//! place, and the copies of page 0 that travel through the WAL leave it zero.

use std::collections::BTreeSet;

use byteorder::{BigEndian, ByteOrder};

use crate::concurrency::CommitSequence;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{is_valid_page_size, PageNumber};

pub const META_MAGIC: [u8; 8] = *b"SNAPDB\0\x01";

/// Size of the fixed part of the meta page.
pub const META_HEADER_SIZE: usize = 40;

/// Byte range of the checkpoint horizon within page 0.
pub const HORIZON_RANGE: std::ops::Range<usize> = 20..28;

/// Highest sequence whose pages the base file may already hold.
pub fn read_horizon(buf: &[u8]) -> CommitSequence {
    CommitSequence::new(BigEndian::read_u64(&buf[HORIZON_RANGE]))
}

pub fn write_horizon(buf: &mut [u8], horizon: CommitSequence) {
    BigEndian::write_u64(&mut buf[HORIZON_RANGE], horizon.value());
}

/// Immutable identity of a store, read from the first bytes of the base file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: usize,
    pub store_id: u64,
}

impl FileHeader {
    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        if buf.len() < META_HEADER_SIZE {
            return Err(StorageError::Corruption(format!(
                "file header too small: {} bytes",
                buf.len()
            )));
        }
        if buf[0..8] != META_MAGIC {
            return Err(StorageError::Corruption("bad file magic".to_string()));
        }
        let page_size = BigEndian::read_u32(&buf[8..12]) as usize;
        if !is_valid_page_size(page_size) {
            return Err(StorageError::Corruption(format!(
                "invalid page size in header: {}",
                page_size
            )));
        }
        Ok(Self {
            page_size,
            store_id: BigEndian::read_u64(&buf[12..20]),
        })
    }
}

/// Page count and free list, versioned through the WAL like any other page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocState {
    page_count: u32,
    free: BTreeSet<PageNumber>,
}

impl AllocState {
    /// A fresh store holds only the meta page.
    pub fn new() -> Self {
        Self {
            page_count: 1,
            free: BTreeSet::new(),
        }
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn free_pages(&self) -> impl Iterator<Item = PageNumber> + '_ {
        self.free.iter().copied()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn is_allocated(&self, page: PageNumber) -> bool {
        !page.is_meta() && page.0 < self.page_count && !self.free.contains(&page)
    }

    /// Hands out the lowest free page, or extends the page count.
    pub fn allocate(&mut self) -> StorageResult<PageNumber> {
        if let Some(page) = self.free.pop_first() {
            return Ok(page);
        }
        if self.page_count > PageNumber::MAX.0 {
            return Err(StorageError::Corruption(
                "page number space exhausted".to_string(),
            ));
        }
        let page = PageNumber(self.page_count);
        self.page_count += 1;
        Ok(page)
    }

    pub fn free(&mut self, page: PageNumber, capacity: usize) -> StorageResult<()> {
        if !self.is_allocated(page) {
            return Err(StorageError::PageNotFound(page));
        }
        if self.free.len() >= capacity {
            return Err(StorageError::FreeListFull { capacity });
        }
        self.free.insert(page);
        Ok(())
    }
}

impl Default for AllocState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded meta page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPage {
    pub header: FileHeader,
    pub alloc: AllocState,
}

impl MetaPage {
    pub fn new(page_size: usize, store_id: u64) -> Self {
        Self {
            header: FileHeader {
                page_size,
                store_id,
            },
            alloc: AllocState::new(),
        }
    }

    /// Number of free list entries that fit after the fixed header.
    pub fn free_capacity(page_size: usize) -> usize {
        (page_size - META_HEADER_SIZE) / 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let page_size = self.header.page_size;
        let mut buf = vec![0u8; page_size];
        buf[0..8].copy_from_slice(&META_MAGIC);
        BigEndian::write_u32(&mut buf[8..12], page_size as u32);
        BigEndian::write_u64(&mut buf[12..20], self.header.store_id);
        BigEndian::write_u32(&mut buf[28..32], self.alloc.page_count);
        BigEndian::write_u32(&mut buf[32..36], self.alloc.free.len() as u32);

        let mut offset = META_HEADER_SIZE;
        for page in &self.alloc.free {
            BigEndian::write_u32(&mut buf[offset..offset + 4], page.0);
            offset += 4;
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        let header = FileHeader::decode(buf)?;
        if buf.len() != header.page_size {
            return Err(StorageError::Corruption(format!(
                "meta page is {} bytes, header says {}",
                buf.len(),
                header.page_size
            )));
        }

        let page_count = BigEndian::read_u32(&buf[28..32]);
        let free_count = BigEndian::read_u32(&buf[32..36]) as usize;
        if free_count > Self::free_capacity(header.page_size) {
            return Err(StorageError::Corruption(format!(
                "free list length {} exceeds capacity",
                free_count
            )));
        }

        let mut free = BTreeSet::new();
        for i in 0..free_count {
            let offset = META_HEADER_SIZE + i * 4;
            let page = PageNumber(BigEndian::read_u32(&buf[offset..offset + 4]));
            if page.is_meta() || page.0 >= page_count {
                return Err(StorageError::Corruption(format!(
                    "free list entry {} out of range",
                    page.0
                )));
            }
            free.insert(page);
        }

        Ok(Self {
            header,
            alloc: AllocState { page_count, free },
        })
    }
}
