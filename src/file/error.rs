use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file id: {0}")]
    InvalidFileId(usize),

    #[error("Page not cached: page_id={0}")]
    PageNotCached(usize),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("File handle limit reached ({0} open)")]
    TooManyOpenFiles(usize),
}

pub type FileResult<T> = Result<T, FileError>;
