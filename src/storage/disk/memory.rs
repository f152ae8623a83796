use crate::storage::disk::{DiskManager, PAGE_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// In-memory page store, used by tests and the workload runner.
#[derive(Default)]
pub struct MemoryPageManager {
    pages: DashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    high_water: AtomicU32,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryPageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read_page` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `write_page` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Whether the page has ever been written.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }
}

impl DiskManager for MemoryPageManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.pages.get(&page_id) {
            Some(page) => buf.copy_from_slice(&page.value()[..]),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);
        self.pages.insert(page_id, page);
        self.high_water.fetch_max(page_id.0 + 1, Ordering::SeqCst);
        Ok(())
    }

    fn num_pages(&self) -> StorageResult<u32> {
        Ok(self.high_water.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_page_reads_zeroes() {
        let disk = MemoryPageManager::new();
        let mut buf = [9u8; PAGE_SIZE];
        disk.read_page(PageId(3), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.read_count(), 1);
        assert_eq!(disk.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let disk = MemoryPageManager::new();
        let mut data = [0u8; PAGE_SIZE];
        data[17] = 0xAB;
        disk.write_page(PageId(4), &data).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(PageId(4), &mut buf).unwrap();
        assert_eq!(buf[17], 0xAB);
        assert!(disk.contains(PageId(4)));
        assert_eq!(disk.num_pages().unwrap(), 5);
        assert_eq!(disk.write_count(), 1);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let disk = MemoryPageManager::new();
        assert!(disk.write_page(PageId(0), &[0u8; 16]).is_err());
    }
}
