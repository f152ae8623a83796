use crate::storage::disk::{DiskManager, PAGE_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// File-backed page store. Page `n` lives at byte offset `n * PAGE_SIZE`.
pub struct PageManager {
    file: Mutex<File>,
}

impl PageManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        log::debug!("Created page file {:?}", path);
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        log::debug!("Opened page file {:?}", path);
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn check_len(len: usize) -> StorageResult<()> {
        if len != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: len,
            });
        }
        Ok(())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}

impl DiskManager for PageManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        Self::check_len(buf.len())?;

        let offset = Self::page_offset(page_id);
        let mut file = self.file.lock();
        let file_size = file.metadata()?.len();

        if offset >= file_size {
            log::debug!("Page {} is past end of file, reading zeroes", page_id);
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        Self::check_len(data.len())?;

        let offset = Self::page_offset(page_id);
        let mut file = self.file.lock();
        let file_size = file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            file.set_len(offset + PAGE_SIZE as u64)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_all()?;

        Ok(())
    }

    fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.lock().metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let pm = PageManager::create(&file_path)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        {
            let pm = PageManager::open(&file_path)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.db"))?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(PageId(0), &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageId(0), &mut read_buf)?;

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_page_boundary() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.db"))?;

        pm.write_page(PageId(0), &vec![1u8; PAGE_SIZE])?;
        pm.write_page(PageId(1), &vec![2u8; PAGE_SIZE])?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(PageId(0), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 1));

        pm.read_page(PageId(1), &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 2));

        Ok(())
    }

    #[test]
    fn test_read_past_end_is_zeroed() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.db"))?;

        let mut buf = vec![7u8; PAGE_SIZE];
        pm.read_page(PageId(10), &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(pm.num_pages()?, 0);

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.db"))?;

        let mut small_buf = vec![0u8; 100];
        assert!(matches!(
            pm.read_page(PageId(0), &mut small_buf),
            Err(StorageError::InvalidBufferSize { actual: 100, .. })
        ));
        assert!(pm.write_page(PageId(0), &small_buf).is_err());

        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let pm = PageManager::create(&dir.path().join("test.db"))?;

        pm.write_page(PageId(5), &vec![5u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 6);

        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let pm = PageManager::create(&file_path)?;
            pm.write_page(PageId(0), &vec![99u8; PAGE_SIZE])?;
        }

        {
            let pm = PageManager::open(&file_path)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            pm.read_page(PageId(0), &mut buf)?;
            assert_eq!(buf[0], 99);
        }

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> Result<()> {
        let dir = tempdir()?;
        let result = PageManager::open(&dir.path().join("nonexistent.db"));
        assert!(matches!(result, Err(StorageError::Io(_))));
        Ok(())
    }
}
