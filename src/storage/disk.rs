//! Disk I/O capability consumed by the buffer pool.
//!
//! The pool only ever moves whole pages. Implementations must zero-fill reads
//! of pages that were allocated but never written, since a freshly created page
//! can be evicted clean before it reaches the backing store.

pub mod memory;
pub mod page_manager;

use crate::storage::error::StorageResult;
use crate::storage::page::PageId;

pub const PAGE_SIZE: usize = 4096;

pub trait DiskManager: Send + Sync {
    /// Read one page into `buf`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()>;

    /// Write one page from `data`.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> StorageResult<()>;

    /// Number of pages currently backed by storage.
    fn num_pages(&self) -> StorageResult<u32>;
}

pub use memory::MemoryPageManager;
pub use page_manager::PageManager;
