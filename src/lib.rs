pub mod btree;
pub mod file;
pub mod index;
pub mod record;

pub use btree::{
    AttrType, BPlusTree, BPlusTreeError, BPlusTreeResult, IndexHeader, KeySchema, KeyValue,
};
pub use file::{BUFFER_POOL_SIZE, BufferManager, FileId, PAGE_SIZE, PageId, PagedFileManager};
pub use index::{IndexError, IndexFile, IndexManager, IndexResult};
pub use record::{
    HeapFile, HeapFileHeader, HeapScan, RecordError, RecordId, RecordManager, RecordResult,
};
