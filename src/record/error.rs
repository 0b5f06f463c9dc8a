use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record size {size} not supported (must be 1..={max} bytes)")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Record id out of range: page_id={0}, slot_id={1}")]
    InvalidRid(usize, usize),

    #[error("Slot is empty: page_id={0}, slot_id={1}")]
    SlotEmpty(usize, usize),

    #[error("Payload length mismatch: expected {expected}, got {actual}")]
    PayloadSize { expected: usize, actual: usize },

    #[error("Corrupted heap file header: {0}")]
    CorruptedHeader(String),

    #[error("Heap file not open: {0}")]
    FileNotOpen(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
