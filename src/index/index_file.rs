//! Index file management

use std::path::{Path, PathBuf};

use log::info;

use crate::btree::{AttrType, BPlusTree, IndexHeader, Node};
use crate::file::BufferManager;

use super::error::{IndexError, IndexResult};

/// One open index file and the tree stored in it
#[derive(Debug)]
pub struct IndexFile {
    tree: BPlusTree,
    path: PathBuf,
}

impl IndexFile {
    /// Create an index file keyed by `attrs`: page 0 gets the header with the
    /// computed node layout, page 1 an empty root leaf.
    pub fn create<P: AsRef<Path>>(
        buffer_mgr: &mut BufferManager,
        path: P,
        attrs: Vec<AttrType>,
    ) -> IndexResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(IndexError::IndexAlreadyExists(path.display().to_string()));
        }
        let header = IndexHeader::new(attrs)?;

        buffer_mgr.create_file(path)?;
        let file = buffer_mgr.open_file(path)?;
        header.encode(buffer_mgr.get_page_mut(file, 0)?);
        Node::leaf().encode(buffer_mgr.get_page_mut(file, 1)?, &header.layout);
        buffer_mgr.write_back(file, 0)?;
        buffer_mgr.write_back(file, 1)?;

        info!(
            "created index {} (key_len={}, max_children={})",
            path.display(),
            header.schema.key_len(),
            header.layout.max_children
        );
        Ok(Self {
            tree: BPlusTree::open(buffer_mgr, file)?,
            path: path.to_path_buf(),
        })
    }

    pub fn open<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> IndexResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IndexError::IndexNotFound(path.display().to_string()));
        }

        let file = buffer_mgr.open_file(path)?;
        let tree = BPlusTree::open(buffer_mgr, file)?;
        info!("opened index {} (root={})", path.display(), tree.header().root);
        Ok(Self {
            tree,
            path: path.to_path_buf(),
        })
    }

    /// Persist the header and close. Flushes the entire buffer pool.
    pub fn close(self, buffer_mgr: &mut BufferManager) -> IndexResult<()> {
        self.tree.persist_header(buffer_mgr)?;
        buffer_mgr.close_file(self.tree.file_id())?;
        info!("closed index {}", self.path.display());
        Ok(())
    }

    /// Delete a closed index file. Flushes the entire buffer pool.
    pub fn destroy<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> IndexResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IndexError::IndexNotFound(path.display().to_string()));
        }
        buffer_mgr.remove_file(path)?;
        info!("destroyed index {}", path.display());
        Ok(())
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BPlusTree {
        &mut self.tree
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<db_path>/<table>_<col1>_<col2>....idx`
    pub fn index_file_path(db_path: &str, table_name: &str, columns: &[&str]) -> String {
        format!("{}/{}_{}.idx", db_path, table_name, columns.join("_"))
    }
}
