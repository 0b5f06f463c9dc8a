use thiserror::Error;

use crate::file::{FileError, PageId};

/// Errors that can occur during B+ tree operations
#[derive(Debug, Error)]
pub enum BPlusTreeError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Key length mismatch: expected {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("Invalid key schema: {0}")]
    InvalidKeySchema(String),

    #[error("Corrupted index header: {0}")]
    CorruptedHeader(String),

    #[error("Corrupted node at page {0}")]
    CorruptedNode(PageId),

    #[error("Key value does not match schema: {0}")]
    KeyValueMismatch(String),

    #[error("Page {child} is not referenced by its parent {parent}")]
    ChildNotFound { parent: PageId, child: PageId },
}

pub type BPlusTreeResult<T> = Result<T, BPlusTreeError>;
