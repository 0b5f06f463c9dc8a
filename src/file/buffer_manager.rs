use log::{debug, trace};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::Path;

use super::error::{FileError, FileResult};
use super::file_manager::{FileId, PagedFileManager};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PageKey {
    file: FileId,
    page_id: PageId,
}

/// One cached page frame
struct Frame {
    data: Vec<u8>,
    dirty: bool,
}

/// Page cache shared by every open heap and index file.
///
/// Pages are borrowed for the duration of a single call and never held across
/// calls; callers re-fetch what they need and rely on the cache for locality.
/// Eviction is least-recently-used and writes dirty frames back first.
pub struct BufferManager {
    file_manager: PagedFileManager,
    frames: LruCache<PageKey, Frame>,
    capacity: usize,
    /// Buffer recycled from the last eviction, reused for the next load
    spare: Vec<u8>,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            file_manager,
            frames: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            capacity,
            spare: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        self.file_manager.create_file(path)
    }

    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        self.file_manager.open_file(path)
    }

    /// Read-only view of a page, loading it on a miss
    pub fn get_page(&mut self, file: FileId, page_id: PageId) -> FileResult<&[u8]> {
        let key = PageKey { file, page_id };
        if !self.frames.contains(&key) {
            self.load(key)?;
        }
        self.frames
            .get(&key)
            .map(|frame| frame.data.as_slice())
            .ok_or(FileError::PageNotCached(page_id))
    }

    /// Writable view of a page, loading it on a miss. The frame is marked dirty.
    pub fn get_page_mut(&mut self, file: FileId, page_id: PageId) -> FileResult<&mut [u8]> {
        let key = PageKey { file, page_id };
        if !self.frames.contains(&key) {
            self.load(key)?;
        }
        let frame = self
            .frames
            .get_mut(&key)
            .ok_or(FileError::PageNotCached(page_id))?;
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    pub fn mark_dirty(&mut self, file: FileId, page_id: PageId) -> FileResult<()> {
        let key = PageKey { file, page_id };
        let frame = self
            .frames
            .peek_mut(&key)
            .ok_or(FileError::PageNotCached(page_id))?;
        frame.dirty = true;
        Ok(())
    }

    /// Mark a cached page as most recently used
    pub fn pin(&mut self, file: FileId, page_id: PageId) -> FileResult<()> {
        let key = PageKey { file, page_id };
        if !self.frames.contains(&key) {
            return Err(FileError::PageNotCached(page_id));
        }
        self.frames.promote(&key);
        Ok(())
    }

    /// Write one page to disk if it is dirty
    pub fn write_back(&mut self, file: FileId, page_id: PageId) -> FileResult<()> {
        let key = PageKey { file, page_id };
        if let Some(frame) = self.frames.peek_mut(&key) {
            if frame.dirty {
                self.file_manager.write_page(file, page_id, &frame.data)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Write every dirty page of every file and sync them
    pub fn flush_all(&mut self) -> FileResult<()> {
        let dirty: Vec<PageKey> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in &dirty {
            if let Some(frame) = self.frames.peek_mut(key) {
                self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
                frame.dirty = false;
            }
        }
        if !dirty.is_empty() {
            debug!("flushed {} dirty pages", dirty.len());
        }
        self.file_manager.sync_all()
    }

    /// Flush the whole cache, forget the frames of `file` and close it
    pub fn close_file(&mut self, file: FileId) -> FileResult<()> {
        self.flush_all()?;
        self.discard_frames(file);
        self.file_manager.close_file(file)
    }

    /// Flush the whole cache, forget the frames of the file at `path` if it is
    /// open, and delete it from disk
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        self.flush_all()?;
        if let Some(file) = self.file_manager.lookup(&path) {
            self.discard_frames(file);
        }
        self.file_manager.remove_file(path)
    }

    /// Drop one page from the pool, writing it first if dirty
    pub fn evict_page(&mut self, file: FileId, page_id: PageId) -> FileResult<()> {
        self.write_back(file, page_id)?;
        self.frames.pop(&PageKey { file, page_id });
        Ok(())
    }

    pub fn buffer_pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn is_page_cached(&self, file: FileId, page_id: PageId) -> bool {
        self.frames.contains(&PageKey { file, page_id })
    }

    pub fn dirty_page_count(&self) -> usize {
        self.frames.iter().filter(|(_, frame)| frame.dirty).count()
    }

    fn discard_frames(&mut self, file: FileId) {
        let keys: Vec<PageKey> = self
            .frames
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.frames.pop(&key);
        }
    }

    fn load(&mut self, key: PageKey) -> FileResult<()> {
        while self.frames.len() >= self.capacity {
            self.evict_lru()?;
        }

        if self.spare.len() != PAGE_SIZE {
            self.spare = vec![0u8; PAGE_SIZE];
        }
        self.file_manager
            .read_page(key.file, key.page_id, &mut self.spare)?;
        trace!("loaded page {} of file {}", key.page_id, key.file.as_usize());

        let data = std::mem::take(&mut self.spare);
        self.frames.put(key, Frame { data, dirty: false });
        Ok(())
    }

    fn evict_lru(&mut self) -> FileResult<()> {
        if let Some((key, frame)) = self.frames.pop_lru() {
            if frame.dirty {
                self.file_manager
                    .write_page(key.file, key.page_id, &frame.data)?;
            }
            self.spare = frame.data;
        }
        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(capacity: usize) -> (TempDir, BufferManager, FileId) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.db");
        let mut files = PagedFileManager::new();
        files.create_file(&path).unwrap();
        let file = files.open_file(&path).unwrap();
        (dir, BufferManager::with_capacity(files, capacity), file)
    }

    #[test]
    fn test_get_page_mut_marks_dirty() {
        let (_dir, mut bm, file) = setup(8);

        bm.get_page(file, 0).unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        bm.get_page_mut(file, 1).unwrap()[0] = 5;
        assert_eq!(bm.dirty_page_count(), 1);
        assert_eq!(bm.get_page(file, 1).unwrap()[0], 5);
    }

    #[test]
    fn test_write_back_then_reload() {
        let (_dir, mut bm, file) = setup(8);

        bm.get_page_mut(file, 2).unwrap()[10] = 42;
        bm.write_back(file, 2).unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        bm.evict_page(file, 2).unwrap();
        assert!(!bm.is_page_cached(file, 2));
        assert_eq!(bm.get_page(file, 2).unwrap()[10], 42);
    }

    #[test]
    fn test_lru_eviction_writes_dirty_pages() {
        let (_dir, mut bm, file) = setup(2);

        bm.get_page_mut(file, 0).unwrap()[0] = 77;
        bm.get_page(file, 1).unwrap();
        bm.get_page(file, 2).unwrap();
        assert_eq!(bm.buffer_pool_size(), 2);
        assert!(!bm.is_page_cached(file, 0));

        assert_eq!(bm.get_page(file, 0).unwrap()[0], 77);
    }

    #[test]
    fn test_pin_protects_from_next_eviction() {
        let (_dir, mut bm, file) = setup(2);

        bm.get_page(file, 0).unwrap();
        bm.get_page(file, 1).unwrap();
        bm.pin(file, 0).unwrap();
        bm.get_page(file, 2).unwrap();

        assert!(bm.is_page_cached(file, 0));
        assert!(!bm.is_page_cached(file, 1));
        assert!(matches!(bm.pin(file, 1), Err(FileError::PageNotCached(1))));
    }

    #[test]
    fn test_close_file_flushes_and_forgets_frames() {
        let (dir, mut bm, file) = setup(8);

        bm.get_page_mut(file, 0).unwrap()[0] = 9;
        bm.close_file(file).unwrap();
        assert_eq!(bm.buffer_pool_size(), 0);
        assert!(!bm.file_manager().is_open(file));

        let file = bm.open_file(dir.path().join("pages.db")).unwrap();
        assert_eq!(bm.get_page(file, 0).unwrap()[0], 9);
    }

    #[test]
    fn test_drop_flushes_dirty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut files = PagedFileManager::new();
            files.create_file(&path).unwrap();
            let file = files.open_file(&path).unwrap();
            let mut bm = BufferManager::new(files);
            bm.get_page_mut(file, 0).unwrap()[3] = 88;
        }

        let mut bm = BufferManager::new(PagedFileManager::new());
        let file = bm.open_file(&path).unwrap();
        assert_eq!(bm.get_page(file, 0).unwrap()[3], 88);
    }
}
