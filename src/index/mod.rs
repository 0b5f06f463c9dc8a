//! Index management module

mod error;
mod index_file;
#[cfg(test)]
mod tests;

pub use error::{IndexError, IndexResult};
pub use index_file::IndexFile;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::btree::{AttrType, KeyValue};
use crate::file::{BufferManager, lock_buffer};
use crate::record::RecordId;

/// (table name, indexed columns in key order)
type IndexKey = (String, Vec<String>);

fn index_key(table_name: &str, columns: &[&str]) -> IndexKey {
    (
        table_name.to_string(),
        columns.iter().map(|c| c.to_string()).collect(),
    )
}

fn not_open(table_name: &str, columns: &[&str]) -> IndexError {
    IndexError::IndexNotOpen(format!("{}_{}", table_name, columns.join("_")))
}

/// High-level index manager
pub struct IndexManager {
    buffer_manager: Arc<Mutex<BufferManager>>,

    /// Open indexes by table and column list
    open_indexes: HashMap<IndexKey, IndexFile>,
}

impl IndexManager {
    pub fn new(buffer_manager: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer_manager,
            open_indexes: HashMap::new(),
        }
    }

    /// Create an index over `columns` of `table_name`, with one attribute type
    /// per column, and keep it open
    pub fn create_index(
        &mut self,
        db_path: &str,
        table_name: &str,
        columns: &[&str],
        attrs: Vec<AttrType>,
    ) -> IndexResult<()> {
        let file_path = IndexFile::index_file_path(db_path, table_name, columns);
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = IndexFile::create(&mut buffer_manager, &file_path, attrs)?;
        drop(buffer_manager);

        self.open_indexes
            .insert(index_key(table_name, columns), index_file);
        Ok(())
    }

    /// Drop an index, closing it first if open
    pub fn drop_index(&mut self, db_path: &str, table_name: &str, columns: &[&str]) -> IndexResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        if let Some(index_file) = self.open_indexes.remove(&index_key(table_name, columns)) {
            index_file.close(&mut buffer_manager)?;
        }

        let file_path = IndexFile::index_file_path(db_path, table_name, columns);
        IndexFile::destroy(&mut buffer_manager, &file_path)
    }

    pub fn open_index(&mut self, db_path: &str, table_name: &str, columns: &[&str]) -> IndexResult<()> {
        let key = index_key(table_name, columns);

        // Don't open if already open
        if self.open_indexes.contains_key(&key) {
            return Ok(());
        }

        let file_path = IndexFile::index_file_path(db_path, table_name, columns);
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = IndexFile::open(&mut buffer_manager, &file_path)?;
        drop(buffer_manager);

        self.open_indexes.insert(key, index_file);
        Ok(())
    }

    /// Close an index. Closing one that is not open is a no-op.
    pub fn close_index(&mut self, table_name: &str, columns: &[&str]) -> IndexResult<()> {
        if let Some(index_file) = self.open_indexes.remove(&index_key(table_name, columns)) {
            let mut buffer_manager = lock_buffer(&self.buffer_manager);
            index_file.close(&mut buffer_manager)?;
        }
        Ok(())
    }

    pub fn close_all(&mut self) -> IndexResult<()> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        for (_, index_file) in self.open_indexes.drain() {
            index_file.close(&mut buffer_manager)?;
        }
        Ok(())
    }

    pub fn is_open(&self, table_name: &str, columns: &[&str]) -> bool {
        self.open_indexes
            .contains_key(&index_key(table_name, columns))
    }

    pub fn get_index(&self, table_name: &str, columns: &[&str]) -> Option<&IndexFile> {
        self.open_indexes.get(&index_key(table_name, columns))
    }

    /// Insert `values -> rid`. Returns `false` when `unique` is set and the key
    /// is already present.
    pub fn insert(
        &mut self,
        table_name: &str,
        columns: &[&str],
        values: &[KeyValue],
        rid: RecordId,
        unique: bool,
    ) -> IndexResult<bool> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let key = index_file.tree().schema().encode(values)?;
        Ok(index_file
            .tree_mut()
            .insert(&mut buffer_manager, &key, rid, unique, false)?)
    }

    /// Whether inserting `values` would keep the index free of duplicates,
    /// without inserting anything
    pub fn check_unique(
        &mut self,
        table_name: &str,
        columns: &[&str],
        values: &[KeyValue],
    ) -> IndexResult<bool> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let key = index_file.tree().schema().encode(values)?;
        Ok(index_file
            .tree_mut()
            .insert(&mut buffer_manager, &key, RecordId::new(0, 0), true, true)?)
    }

    /// Delete the exact `(values, rid)` entry. Returns whether it existed.
    pub fn delete(
        &mut self,
        table_name: &str,
        columns: &[&str],
        values: &[KeyValue],
        rid: RecordId,
    ) -> IndexResult<bool> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let key = index_file.tree().schema().encode(values)?;
        Ok(index_file.tree_mut().delete(&mut buffer_manager, &key, rid)?)
    }

    /// Record ids of every entry equal to `values`
    pub fn search_all(
        &mut self,
        table_name: &str,
        columns: &[&str],
        values: &[KeyValue],
    ) -> IndexResult<Vec<RecordId>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let key = index_file.tree().schema().encode(values)?;
        Ok(index_file.tree_mut().search_all(&mut buffer_manager, &key)?)
    }

    /// Entries in `[lower, upper]`, with decoded key values
    pub fn range_search(
        &mut self,
        table_name: &str,
        columns: &[&str],
        lower: &[KeyValue],
        upper: &[KeyValue],
    ) -> IndexResult<Vec<(Vec<KeyValue>, RecordId)>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let schema = index_file.tree().schema().clone();
        let (lower, upper) = (schema.encode(lower)?, schema.encode(upper)?);
        let hits = index_file
            .tree_mut()
            .range_search(&mut buffer_manager, &lower, &upper)?;

        let mut results = Vec::with_capacity(hits.len());
        for (key, rid) in hits {
            results.push((schema.decode(&key)?, rid));
        }
        Ok(results)
    }

    /// Position the cursor of an index; see [`crate::btree::BPlusTree::scan_from`]
    pub fn scan_from(
        &mut self,
        table_name: &str,
        columns: &[&str],
        values: &[KeyValue],
        inclusive: bool,
    ) -> IndexResult<bool> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;

        let key = index_file.tree().schema().encode(values)?;
        Ok(index_file
            .tree_mut()
            .scan_from(&mut buffer_manager, &key, inclusive)?)
    }

    pub fn next(&mut self, table_name: &str, columns: &[&str]) -> IndexResult<Option<RecordId>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;
        Ok(index_file.tree_mut().next_entry(&mut buffer_manager)?)
    }

    pub fn prev(&mut self, table_name: &str, columns: &[&str]) -> IndexResult<Option<RecordId>> {
        let mut buffer_manager = lock_buffer(&self.buffer_manager);
        let index_file = self
            .open_indexes
            .get_mut(&index_key(table_name, columns))
            .ok_or_else(|| not_open(table_name, columns))?;
        Ok(index_file.tree_mut().prev_entry(&mut buffer_manager)?)
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        // Try to close all indexes cleanly
        let _ = self.close_all();
    }
}
