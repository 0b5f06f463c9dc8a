mod error;
mod heap_file;
mod page;
mod record;

pub use error::{RecordError, RecordResult};
pub use heap_file::{HeapFile, HeapScan};
pub use page::{HeapFileHeader, HeapPage};
pub use record::{RecordId, SlotId};

use crate::file::{BufferManager, lock_buffer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// High-level record manager for all open heap files, keyed by path
pub struct RecordManager {
    buffer_manager: Arc<Mutex<BufferManager>>,
    open_files: HashMap<String, HeapFile>,
}

impl RecordManager {
    pub fn new(buffer_manager: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer_manager,
            open_files: HashMap::new(),
        }
    }

    /// Create a heap file and keep it open
    pub fn create_file(&mut self, path: &str, record_size: usize) -> RecordResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = HeapFile::create(&mut buffer_manager, path, record_size)?;
        drop(buffer_manager);
        self.open_files.insert(path.to_string(), heap);
        Ok(())
    }

    /// Open an existing heap file. Opening an already-open file is a no-op so
    /// the in-memory header is never replaced by a stale on-disk copy.
    pub fn open_file(&mut self, path: &str) -> RecordResult<()> {
        if self.open_files.contains_key(path) {
            return Ok(());
        }

        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = HeapFile::open(&mut buffer_manager, path)?;
        drop(buffer_manager);
        self.open_files.insert(path.to_string(), heap);
        Ok(())
    }

    pub fn close_file(&mut self, path: &str) -> RecordResult<()> {
        let heap = self
            .open_files
            .remove(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        heap.close(&mut buffer_manager)
    }

    pub fn close_all(&mut self) -> RecordResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        for (_, heap) in self.open_files.drain() {
            heap.close(&mut buffer_manager)?;
        }
        Ok(())
    }

    /// Close (if open) and delete a heap file
    pub fn destroy_file(&mut self, path: &str) -> RecordResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        if let Some(heap) = self.open_files.remove(path) {
            heap.close(&mut buffer_manager)?;
        }
        HeapFile::destroy(&mut buffer_manager, Path::new(path))
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open_files.contains_key(path)
    }

    pub fn header(&self, path: &str) -> RecordResult<HeapFileHeader> {
        self.open_files
            .get(path)
            .map(|heap| *heap.header())
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))
    }

    pub fn insert(&mut self, path: &str, payload: &[u8]) -> RecordResult<RecordId> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get_mut(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        heap.insert(&mut buffer_manager, payload)
    }

    /// Insert many records under a single lock acquisition
    pub fn bulk_insert(&mut self, path: &str, payloads: &[Vec<u8>]) -> RecordResult<Vec<RecordId>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get_mut(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;

        let mut record_ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            record_ids.push(heap.insert(&mut buffer_manager, payload)?);
        }
        Ok(record_ids)
    }

    pub fn delete(&mut self, path: &str, rid: RecordId) -> RecordResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get_mut(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        heap.delete(&mut buffer_manager, rid)
    }

    pub fn update(&mut self, path: &str, rid: RecordId, payload: &[u8]) -> RecordResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get_mut(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        heap.update(&mut buffer_manager, rid, payload)
    }

    pub fn get(&self, path: &str, rid: RecordId) -> RecordResult<Vec<u8>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        heap.get(&mut buffer_manager, rid)
    }

    /// All records of a heap file in rid order
    pub fn scan(&self, path: &str) -> RecordResult<Vec<(RecordId, Vec<u8>)>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let heap = self
            .open_files
            .get(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))?;
        heap.scan_all(&mut buffer_manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;

    fn setup() -> (tempfile::TempDir, RecordManager) {
        let dir = tempfile::tempdir().unwrap();
        let bm = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        (dir, RecordManager::new(bm))
    }

    #[test]
    fn test_manager_round_trip() {
        let (dir, mut mgr) = setup();
        let path = dir.path().join("people.heap");
        let path = path.to_str().unwrap();

        mgr.create_file(path, 4).unwrap();
        let rids = mgr
            .bulk_insert(path, &[vec![1; 4], vec![2; 4], vec![3; 4]])
            .unwrap();
        mgr.update(path, rids[1], &[9; 4]).unwrap();
        mgr.delete(path, rids[0]).unwrap();

        let rows = mgr.scan(path).unwrap();
        assert_eq!(rows, vec![(rids[1], vec![9; 4]), (rids[2], vec![3; 4])]);

        mgr.close_file(path).unwrap();
        assert!(matches!(mgr.get(path, rids[1]), Err(RecordError::FileNotOpen(_))));

        mgr.open_file(path).unwrap();
        assert_eq!(mgr.get(path, rids[2]).unwrap(), vec![3; 4]);
        assert_eq!(mgr.header(path).unwrap().page_count, 1);
    }

    #[test]
    fn test_reopen_keeps_in_memory_header() {
        let (dir, mut mgr) = setup();
        let path = dir.path().join("t.heap");
        let path = path.to_str().unwrap();

        mgr.create_file(path, 8).unwrap();
        mgr.insert(path, &[1; 8]).unwrap();
        mgr.open_file(path).unwrap();
        assert_eq!(mgr.header(path).unwrap().page_count, 1);
    }

    #[test]
    fn test_destroy_open_file() {
        let (dir, mut mgr) = setup();
        let path = dir.path().join("gone.heap");
        let path_str = path.to_str().unwrap();

        mgr.create_file(path_str, 8).unwrap();
        mgr.insert(path_str, &[0; 8]).unwrap();
        mgr.destroy_file(path_str).unwrap();

        assert!(!mgr.is_open(path_str));
        assert!(!path.exists());
        assert!(mgr.close_all().is_ok());
    }
}
