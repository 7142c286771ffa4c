use crate::concurrency::CommitSequence;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::meta::{
    read_horizon, write_horizon, FileHeader, MetaPage, HORIZON_RANGE, META_HEADER_SIZE,
};
use crate::storage::page::PageNumber;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Raw page I/O against the base file.
///
/// Only the checkpointer writes through this type once a store exists; every
/// other page image lives in the WAL until it is merged.
pub struct PageManager {
    file: File,
    header: FileHeader,
    horizon: CommitSequence,
}

impl PageManager {
    /// Creates a new base file holding only the meta page.
    pub fn create(path: &Path, page_size: usize, store_id: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let meta = MetaPage::new(page_size, store_id);
        let mut pm = Self {
            file,
            header: meta.header,
            horizon: CommitSequence::ZERO,
        };
        pm.write_page(PageNumber::META, &meta.encode())?;
        pm.sync()?;

        Ok(pm)
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf = [0u8; META_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                StorageError::Corruption("base file is shorter than its header".to_string())
            }
            _ => StorageError::Io(e),
        })?;
        let header = FileHeader::decode(&buf)?;
        let horizon = read_horizon(&buf);

        Ok(Self {
            file,
            header,
            horizon,
        })
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Highest sequence a checkpoint may have merged into this file.
    pub fn horizon(&self) -> CommitSequence {
        self.horizon
    }

    /// Records a new checkpoint horizon and syncs it before returning, so
    /// no page newer than the old horizon lands in the file ahead of it.
    pub fn set_horizon(&mut self, horizon: CommitSequence) -> StorageResult<()> {
        let mut buf = [0u8; 8];
        write_horizon(&mut buf[..], horizon);
        self.file.seek(SeekFrom::Start(HORIZON_RANGE.start as u64))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.horizon = horizon;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size
    }

    /// Reads a page image. Pages past the end of the file have never been
    /// written back and read as zeroes; the return value tells which case hit.
    pub fn read_page(&mut self, page: PageNumber, buf: &mut [u8]) -> StorageResult<bool> {
        self.check_len(buf.len())?;

        let offset = page.offset(self.page_size());
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            buf.fill(0);
            return Ok(false);
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(true)
    }

    pub fn write_page(&mut self, page: PageNumber, data: &[u8]) -> StorageResult<()> {
        self.check_len(data.len())?;
        if page.is_meta() {
            // Meta images from the WAL carry no horizon; keep the file's own.
            let mut meta = data.to_vec();
            write_horizon(&mut meta, self.horizon);
            return self.write_at(page, &meta);
        }
        self.write_at(page, data)
    }

    fn write_at(&mut self, page: PageNumber, data: &[u8]) -> StorageResult<()> {
        let offset = page.offset(self.page_size());
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + self.page_size() as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        Ok(())
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size() as u64) as u32)
    }

    /// Swaps the underlying file handle, e.g. for a read-only one.
    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) -> File {
        std::mem::replace(&mut self.file, file)
    }

    fn check_len(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size() {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size(),
                actual: len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        // Create new file
        {
            let pm = PageManager::create(&file_path, PAGE_SIZE, 42)?;
            assert_eq!(pm.num_pages()?, 1);
        }

        // Open existing file
        {
            let pm = PageManager::open(&file_path)?;
            assert_eq!(pm.num_pages()?, 1);
            assert_eq!(pm.page_size(), PAGE_SIZE);
            assert_eq!(pm.header().store_id, 42);
        }

        Ok(())
    }

    #[test]
    fn test_create_existing_file_fails() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        let _pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;
        assert!(PageManager::create(&file_path, PAGE_SIZE, 2).is_err());

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(PageNumber(1), &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        assert!(pm.read_page(PageNumber(1), &mut read_buf)?);

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_read_past_end_is_zeroed() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;

        let mut buf = vec![7u8; PAGE_SIZE];
        assert!(!pm.read_page(PageNumber(10), &mut buf)?);
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;

        let mut small_buf = vec![0u8; 100];
        assert!(matches!(
            pm.read_page(PageNumber(1), &mut small_buf),
            Err(StorageError::InvalidPageSize { .. })
        ));

        let small_data = vec![0u8; 100];
        assert!(matches!(
            pm.write_page(PageNumber(1), &small_data),
            Err(StorageError::InvalidPageSize { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("nonexistent.db");

        assert!(PageManager::open(&file_path).is_err());

        Ok(())
    }

    #[test]
    fn test_open_garbage_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("garbage.db");
        std::fs::write(&file_path, vec![0xAB; 64])?;

        assert!(matches!(
            PageManager::open(&file_path),
            Err(StorageError::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn test_horizon_survives_meta_rewrite() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let mut pm = PageManager::create(&file_path, PAGE_SIZE, 3)?;
            assert_eq!(pm.horizon(), CommitSequence::ZERO);
            pm.set_horizon(CommitSequence::new(9))?;

            // A checkpoint merging page 0 must not reset the horizon.
            let mut meta = MetaPage::new(PAGE_SIZE, 3);
            meta.alloc.allocate()?;
            pm.write_page(PageNumber::META, &meta.encode())?;
            pm.sync()?;
        }

        let mut pm = PageManager::open(&file_path)?;
        assert_eq!(pm.horizon(), CommitSequence::new(9));
        let mut buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageNumber::META, &mut buf)?;
        assert_eq!(MetaPage::decode(&buf)?.alloc.page_count(), 2);

        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;

        // Write to page 5 (skipping 1-4)
        let buf = vec![5u8; PAGE_SIZE];
        pm.write_page(PageNumber(5), &buf)?;

        assert_eq!(pm.num_pages()?, 6);

        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let mut pm = PageManager::create(&file_path, PAGE_SIZE, 1)?;
            let buf = vec![99u8; PAGE_SIZE];
            pm.write_page(PageNumber(1), &buf)?;
            pm.sync()?;
        }

        {
            let mut pm = PageManager::open(&file_path)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            pm.read_page(PageNumber(1), &mut buf)?;
            assert_eq!(buf[0], 99);
        }

        Ok(())
    }
}
