use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::error::{RecordError, RecordResult};
use super::page::{HeapFileHeader, HeapPage};
use super::record::RecordId;
use crate::file::{BufferManager, FileId, PageId};

/// A fixed-record-size heap file.
///
/// Page 0 holds the [`HeapFileHeader`]; data pages `1..=page_count` are slotted
/// pages with an occupancy bitmap. Pages with at least one free slot form a
/// singly linked free list threaded through the link word of each listed page,
/// headed by `first_free_page`.
///
/// The in-memory header is the authoritative copy while the file is open and
/// is written back to page 0 whenever the page count or free list changes.
#[derive(Debug)]
pub struct HeapFile {
    file: FileId,
    path: PathBuf,
    header: HeapFileHeader,
}

impl HeapFile {
    /// Create a heap file for records of exactly `record_size` bytes.
    /// Sizes above half a page are rejected before anything touches disk.
    pub fn create<P: AsRef<Path>>(
        buffer_mgr: &mut BufferManager,
        path: P,
        record_size: usize,
    ) -> RecordResult<Self> {
        let header = HeapFileHeader::for_record_size(record_size)?;
        let path = path.as_ref();

        buffer_mgr.create_file(path)?;
        let file = buffer_mgr.open_file(path)?;

        let heap = Self {
            file,
            path: path.to_path_buf(),
            header,
        };
        heap.refresh_header(buffer_mgr)?;
        info!(
            "created heap file {} (record_size={}, records_per_page={})",
            path.display(),
            header.record_size,
            header.records_per_page
        );
        Ok(heap)
    }

    pub fn open<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> RecordResult<Self> {
        let path = path.as_ref();
        let file = buffer_mgr.open_file(path)?;
        let header = HeapFileHeader::decode(buffer_mgr.get_page(file, 0)?)?;
        debug!("opened heap file {} with {} pages", path.display(), header.page_count);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
        })
    }

    /// Close the file. Flushes the whole buffer pool, not just this file.
    pub fn close(self, buffer_mgr: &mut BufferManager) -> RecordResult<()> {
        self.refresh_header(buffer_mgr)?;
        buffer_mgr.close_file(self.file)?;
        Ok(())
    }

    /// Delete a heap file from disk. Flushes the whole buffer pool first.
    pub fn destroy<P: AsRef<Path>>(buffer_mgr: &mut BufferManager, path: P) -> RecordResult<()> {
        buffer_mgr.remove_file(path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn header(&self) -> &HeapFileHeader {
        &self.header
    }

    pub fn record_size(&self) -> usize {
        self.header.record_size
    }

    /// Store `payload` in the first free slot of the free-list head page,
    /// allocating a fresh page when the list is empty.
    pub fn insert(&mut self, buffer_mgr: &mut BufferManager, payload: &[u8]) -> RecordResult<RecordId> {
        self.check_payload(payload)?;

        if self.header.first_free_page == 0 {
            self.header.page_count += 1;
            let page_id = self.header.page_count;
            buffer_mgr.get_page_mut(self.file, page_id)?.fill(0);
            self.header.first_free_page = page_id;
            self.refresh_header(buffer_mgr)?;
            debug!("heap {}: allocated page {}", self.path.display(), page_id);
        }

        let page_id = self.header.first_free_page;
        let (slot_id, next_free) = {
            let buffer = buffer_mgr.get_page_mut(self.file, page_id)?;
            let mut page = HeapPage::new(buffer, self.header);
            let slot_id = page.first_free_slot().ok_or_else(|| {
                RecordError::CorruptedHeader(format!("free-list page {page_id} has no free slot"))
            })?;
            page.write_record(slot_id, payload);
            page.set_slot_used(slot_id);

            // A page that just filled leaves the free list; its link word goes
            // back to being ordinary page storage
            let next_free = if page.is_full() {
                let next = page.free_link();
                page.set_free_link(0);
                Some(next)
            } else {
                None
            };
            (slot_id, next_free)
        };

        if let Some(next) = next_free {
            self.header.first_free_page = next;
            self.refresh_header(buffer_mgr)?;
        }
        Ok(RecordId::new(page_id, slot_id))
    }

    pub fn get(&self, buffer_mgr: &mut BufferManager, rid: RecordId) -> RecordResult<Vec<u8>> {
        self.check_rid(rid)?;
        let page = HeapPage::new(buffer_mgr.get_page(self.file, rid.page_id)?, self.header);
        if !page.is_slot_used(rid.slot_id) {
            return Err(RecordError::SlotEmpty(rid.page_id, rid.slot_id));
        }
        Ok(page.record(rid.slot_id).to_vec())
    }

    /// Overwrite an occupied slot in place
    pub fn update(
        &mut self,
        buffer_mgr: &mut BufferManager,
        rid: RecordId,
        payload: &[u8],
    ) -> RecordResult<()> {
        self.check_payload(payload)?;
        self.check_rid(rid)?;

        let mut page = HeapPage::new(buffer_mgr.get_page_mut(self.file, rid.page_id)?, self.header);
        if !page.is_slot_used(rid.slot_id) {
            return Err(RecordError::SlotEmpty(rid.page_id, rid.slot_id));
        }
        page.write_record(rid.slot_id, payload);
        Ok(())
    }

    /// Free a slot. A page that was full before the delete is pushed onto the
    /// head of the free list.
    pub fn delete(&mut self, buffer_mgr: &mut BufferManager, rid: RecordId) -> RecordResult<()> {
        self.check_rid(rid)?;

        let was_full = {
            let buffer = buffer_mgr.get_page_mut(self.file, rid.page_id)?;
            let mut page = HeapPage::new(buffer, self.header);
            if !page.is_slot_used(rid.slot_id) {
                warn!("heap {}: delete of empty slot {}", self.path.display(), rid);
                return Err(RecordError::SlotEmpty(rid.page_id, rid.slot_id));
            }

            let was_full = page.is_full();
            page.clear_record(rid.slot_id);
            page.set_slot_free(rid.slot_id);
            if was_full {
                page.set_free_link(self.header.first_free_page);
            }
            was_full
        };

        if was_full {
            self.header.first_free_page = rid.page_id;
            self.refresh_header(buffer_mgr)?;
        }
        Ok(())
    }

    /// Cursor over every occupied slot in ascending (page, slot) order
    pub fn scan<'a>(&'a self, buffer_mgr: &'a mut BufferManager) -> HeapScan<'a> {
        HeapScan::new(self, buffer_mgr)
    }

    pub fn scan_all(&self, buffer_mgr: &mut BufferManager) -> RecordResult<Vec<(RecordId, Vec<u8>)>> {
        self.scan(buffer_mgr).collect()
    }

    fn check_payload(&self, payload: &[u8]) -> RecordResult<()> {
        if payload.len() != self.header.record_size {
            return Err(RecordError::PayloadSize {
                expected: self.header.record_size,
                actual: payload.len(),
            });
        }
        Ok(())
    }

    fn check_rid(&self, rid: RecordId) -> RecordResult<()> {
        if rid.page_id == 0
            || rid.page_id > self.header.page_count
            || rid.slot_id >= self.header.records_per_page
        {
            return Err(RecordError::InvalidRid(rid.page_id, rid.slot_id));
        }
        Ok(())
    }

    /// Persist the in-memory header to page 0
    fn refresh_header(&self, buffer_mgr: &mut BufferManager) -> RecordResult<()> {
        self.header.encode(buffer_mgr.get_page_mut(self.file, 0)?);
        buffer_mgr.write_back(self.file, 0)?;
        Ok(())
    }
}

/// Sequential heap scan. Pages are re-fetched on every step, so the cursor
/// holds no page across calls.
pub struct HeapScan<'a> {
    heap: &'a HeapFile,
    buffer_mgr: &'a mut BufferManager,
    page_id: PageId,
    slot_id: usize,
}

impl<'a> HeapScan<'a> {
    fn new(heap: &'a HeapFile, buffer_mgr: &'a mut BufferManager) -> Self {
        Self {
            heap,
            buffer_mgr,
            page_id: 1,
            slot_id: 0,
        }
    }

    /// Move the cursor back to the first record
    pub fn restart(&mut self) {
        self.page_id = 1;
        self.slot_id = 0;
    }
}

impl Iterator for HeapScan<'_> {
    type Item = RecordResult<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.page_id <= self.heap.header.page_count {
            let buffer = match self.buffer_mgr.get_page(self.heap.file, self.page_id) {
                Ok(buffer) => buffer,
                Err(err) => return Some(Err(err.into())),
            };
            let page = HeapPage::new(buffer, self.heap.header);

            if let Some(slot_id) = page.next_used_slot(self.slot_id) {
                let payload = page.record(slot_id).to_vec();
                self.slot_id = slot_id + 1;
                return Some(Ok((RecordId::new(self.page_id, slot_id), payload)));
            }

            self.page_id += 1;
            self.slot_id = 0;
        }
        None
    }
}
