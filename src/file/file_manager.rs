use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::error::{FileError, FileResult};
use super::{MAX_OPEN_FILES, PAGE_SIZE, PageId};

/// Identifier of an open paged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

impl FileId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// File directory: creates, opens, closes and removes paged files and moves
/// whole pages between them and memory.
pub struct PagedFileManager {
    open_files: HashMap<FileId, OpenFile>,
    /// Canonical path -> id, so reopening a path hands back the same id
    by_path: HashMap<PathBuf, FileId>,
    next_id: usize,
    max_open_files: usize,
}

struct OpenFile {
    file: File,
    path: PathBuf,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(MAX_OPEN_FILES)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            by_path: HashMap::new(),
            next_id: 0,
            max_open_files,
        }
    }

    /// Create an empty file, creating missing parent directories
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)?;
        debug!("created file {}", path.display());
        Ok(())
    }

    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let requested = path.as_ref();
        let path = requested
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(requested.display().to_string()))?;

        if let Some(&id) = self.by_path.get(&path) {
            return Ok(id);
        }
        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles(self.open_files.len()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let id = FileId(self.next_id);
        self.next_id += 1;

        info!("opened {} as file {}", path.display(), id.0);
        self.by_path.insert(path.clone(), id);
        self.open_files.insert(id, OpenFile { file, path });
        Ok(id)
    }

    pub fn close_file(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&id)
            .ok_or(FileError::InvalidFileId(id.0))?;
        self.by_path.remove(&entry.path);
        debug!("closed file {}", id.0);
        Ok(())
    }

    /// Delete a file from disk, closing it first if it is open
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        if let Some(id) = self.lookup(path) {
            self.close_file(id)?;
        }
        std::fs::remove_file(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => FileError::FileNotFound(path.display().to_string()),
            _ => FileError::Io(err),
        })?;
        info!("removed file {}", path.display());
        Ok(())
    }

    /// Id of `path` if it is currently open
    pub fn lookup<P: AsRef<Path>>(&self, path: P) -> Option<FileId> {
        let canonical = path.as_ref().canonicalize().ok()?;
        self.by_path.get(&canonical).copied()
    }

    /// Read one page. Pages past the end of the file read back as zeros.
    pub fn read_page(&mut self, id: FileId, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        check_page_buffer(buffer.len())?;
        let file = self.file_mut(id)?;

        file.seek(SeekFrom::Start((page_id * PAGE_SIZE) as u64))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);
        Ok(())
    }

    pub fn write_page(&mut self, id: FileId, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        check_page_buffer(buffer.len())?;
        let file = self.file_mut(id)?;

        let offset = (page_id * PAGE_SIZE) as u64;
        if file.metadata()?.len() < offset + PAGE_SIZE as u64 {
            file.set_len(offset + PAGE_SIZE as u64)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;
        Ok(())
    }

    /// Number of pages currently backed by the file on disk
    pub fn page_count(&mut self, id: FileId) -> FileResult<usize> {
        let len = self.file_mut(id)?.metadata()?.len();
        Ok(len.div_ceil(PAGE_SIZE as u64) as usize)
    }

    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_open(&self, id: FileId) -> bool {
        self.open_files.contains_key(&id)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn file_mut(&mut self, id: FileId) -> FileResult<&mut File> {
        self.open_files
            .get_mut(&id)
            .map(|entry| &mut entry.file)
            .ok_or(FileError::InvalidFileId(id.0))
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn check_page_buffer(len: usize) -> FileResult<()> {
    if len != PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PagedFileManager) {
        (tempfile::tempdir().unwrap(), PagedFileManager::new())
    }

    #[test]
    fn test_create_twice_fails() {
        let (dir, mut files) = setup();
        let path = dir.path().join("t.heap");

        files.create_file(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(
            files.create_file(&path),
            Err(FileError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn test_open_same_path_returns_same_id() {
        let (dir, mut files) = setup();
        let path = dir.path().join("t.heap");
        files.create_file(&path).unwrap();

        let a = files.open_file(&path).unwrap();
        let b = files.open_file(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(files.open_file_count(), 1);

        files.close_file(a).unwrap();
        assert!(!files.is_open(a));
        assert!(matches!(files.close_file(a), Err(FileError::InvalidFileId(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let (dir, mut files) = setup();
        let result = files.open_file(dir.path().join("missing"));
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_page_round_trip_and_sparse_read() {
        let (dir, mut files) = setup();
        let path = dir.path().join("t.heap");
        files.create_file(&path).unwrap();
        let id = files.open_file(&path).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 7;
        page[PAGE_SIZE - 1] = 9;
        files.write_page(id, 3, &page).unwrap();
        assert_eq!(files.page_count(id).unwrap(), 4);

        let mut back = vec![1u8; PAGE_SIZE];
        files.read_page(id, 3, &mut back).unwrap();
        assert_eq!(back, page);

        // Never written: zero-filled
        files.read_page(id, 10, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wrong_buffer_size() {
        let (dir, mut files) = setup();
        let path = dir.path().join("t.heap");
        files.create_file(&path).unwrap();
        let id = files.open_file(&path).unwrap();

        let mut small = vec![0u8; PAGE_SIZE - 1];
        assert!(matches!(
            files.read_page(id, 0, &mut small),
            Err(FileError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_remove_open_file() {
        let (dir, mut files) = setup();
        let path = dir.path().join("t.heap");
        files.create_file(&path).unwrap();
        let id = files.open_file(&path).unwrap();

        files.remove_file(&path).unwrap();
        assert!(!path.exists());
        assert!(!files.is_open(id));
    }

    #[test]
    fn test_max_open_files() {
        let (dir, _) = setup();
        let mut files = PagedFileManager::with_max_files(1);
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        files.create_file(&a).unwrap();
        files.create_file(&b).unwrap();

        files.open_file(&a).unwrap();
        assert!(matches!(
            files.open_file(&b),
            Err(FileError::TooManyOpenFiles(1))
        ));
    }
}
