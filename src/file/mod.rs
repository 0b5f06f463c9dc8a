use std::sync::{Mutex, MutexGuard, PoisonError};

mod buffer_manager;
mod error;
mod file_manager;

pub use buffer_manager::BufferManager;
pub use error::{FileError, FileResult};
pub use file_manager::{FileId, PagedFileManager};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Number of pages in the buffer pool
/// 4096 pages × 8KB = 32MB when fully populated
pub const BUFFER_POOL_SIZE: usize = 4096;

/// Default cap on simultaneously open files
pub const MAX_OPEN_FILES: usize = 128;

/// Page ID type. Page 0 of every file holds its header, so 0 doubles as "no page"
/// in on-disk links.
pub type PageId = usize;

/// Size of one on-disk word
pub const WORD_SIZE: usize = 4;

/// Read a little-endian u32 word at `offset`
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Write a little-endian u32 word at `offset`
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
}

/// Lock a shared buffer pool, recovering it if a previous holder panicked
pub fn lock_buffer(buffer_mgr: &Mutex<BufferManager>) -> MutexGuard<'_, BufferManager> {
    buffer_mgr.lock().unwrap_or_else(PoisonError::into_inner)
}
