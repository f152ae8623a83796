//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Buffer pool is full: every frame is pinned")]
    BufferPoolFull,

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Hash index is full: directory cannot grow past global depth {global_depth}")]
    IndexFull { global_depth: u32 },

    #[error("Duplicate entry: identical key/value pair already present")]
    DuplicateEntry,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Index corrupted: {0}")]
    Corrupted(String),

    #[error("Buffer size must be PAGE_SIZE ({expected}), got {actual}")]
    InvalidBufferSize { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for the conditions a caller may retry once pins are released.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            StorageError::BufferPoolFull | StorageError::IndexFull { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
