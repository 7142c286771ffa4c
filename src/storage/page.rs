pub mod meta;

use std::fmt;

/// Smallest page size accepted by the store.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted by the store.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Identifies a fixed-size page in the base file.
///
/// Page 0 holds the file header and the allocator state; user pages start
/// at 1. The top bit is reserved for the WAL commit marker, so page numbers
/// never exceed [`PageNumber::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(pub u32);

impl PageNumber {
    /// The meta page.
    pub const META: PageNumber = PageNumber(0);

    /// Largest representable page number.
    pub const MAX: PageNumber = PageNumber(0x7FFF_FFFF);

    pub fn is_meta(&self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this page in the base file.
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", self.0)
    }
}

pub fn is_valid_page_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(PageNumber(0).offset(4096), 0);
        assert_eq!(PageNumber(3).offset(4096), 3 * 4096);
        assert_eq!(PageNumber(2).offset(512), 1024);
    }

    #[test]
    fn test_valid_page_sizes() {
        assert!(is_valid_page_size(512));
        assert!(is_valid_page_size(4096));
        assert!(is_valid_page_size(65536));
        assert!(!is_valid_page_size(256));
        assert!(!is_valid_page_size(3000));
        assert!(!is_valid_page_size(131072));
    }

    #[test]
    fn test_meta_page() {
        assert!(PageNumber::META.is_meta());
        assert!(!PageNumber(1).is_meta());
        assert_eq!(format!("{}", PageNumber(7)), "page 7");
    }
}
