//! Storage layer implementation for vibestore.
//!
//! This module provides page-based storage with an in-memory cache in front of
//! it. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **DiskManager**: Reads and writes pages by id (file-backed or in-memory)
//! - **BufferPoolManager**: Fixed set of frames with pinning and LRU eviction
//! - **ParallelBufferPoolManager**: Several pools sharded by page id
//! - **Hash pages**: Directory and bucket layouts used by the hash index

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{
    BufferPool, BufferPoolConfig, BufferPoolManager, PageReadGuard, PageWriteGuard,
    ParallelBufferPoolManager,
};
pub use disk::{DiskManager, MemoryPageManager, PageManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::PageId;
