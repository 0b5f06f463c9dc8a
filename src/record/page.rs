use serde::Serialize;

use super::error::{RecordError, RecordResult};
use super::record::SlotId;
use crate::file::{PAGE_SIZE, PageId, WORD_SIZE, read_u32, write_u32};

/// Heap file header stored in page 0.
///
/// Layout: five little-endian u32 words
/// `[record_size][records_per_page][bitmap_bytes][first_free_page][page_count]`.
/// `first_free_page == 0` means the free list is empty; data pages are
/// numbered `1..=page_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapFileHeader {
    pub record_size: usize,
    pub records_per_page: usize,
    pub bitmap_bytes: usize,
    pub first_free_page: PageId,
    pub page_count: usize,
}

impl HeapFileHeader {
    pub const SIZE: usize = 5 * WORD_SIZE;

    /// Largest record a heap file accepts
    pub const MAX_RECORD_SIZE: usize = PAGE_SIZE / 2;

    /// Compute the page layout for fixed-size records of `record_size` bytes
    pub fn for_record_size(record_size: usize) -> RecordResult<Self> {
        if record_size == 0 || record_size > Self::MAX_RECORD_SIZE {
            return Err(RecordError::RecordTooLarge {
                size: record_size,
                max: Self::MAX_RECORD_SIZE,
            });
        }

        // Largest n with ceil(n/8) + n * record_size fitting beside the free link
        let available = PAGE_SIZE - WORD_SIZE;
        let mut records = available * 8 / (1 + record_size * 8);
        while (records + 1).div_ceil(8) + (records + 1) * record_size <= available {
            records += 1;
        }

        Ok(Self {
            record_size,
            records_per_page: records,
            bitmap_bytes: records.div_ceil(8),
            first_free_page: 0,
            page_count: 0,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        write_u32(buf, 0, self.record_size as u32);
        write_u32(buf, 4, self.records_per_page as u32);
        write_u32(buf, 8, self.bitmap_bytes as u32);
        write_u32(buf, 12, self.first_free_page as u32);
        write_u32(buf, 16, self.page_count as u32);
    }

    pub fn decode(buf: &[u8]) -> RecordResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(RecordError::CorruptedHeader(format!(
                "header needs {} bytes, got {}",
                Self::SIZE,
                buf.len()
            )));
        }

        let header = Self {
            record_size: read_u32(buf, 0) as usize,
            records_per_page: read_u32(buf, 4) as usize,
            bitmap_bytes: read_u32(buf, 8) as usize,
            first_free_page: read_u32(buf, 12) as PageId,
            page_count: read_u32(buf, 16) as usize,
        };

        let used = header.bitmap_bytes + WORD_SIZE + header.records_per_page * header.record_size;
        if header.record_size == 0 || header.records_per_page == 0 || used > PAGE_SIZE {
            return Err(RecordError::CorruptedHeader(format!(
                "record_size={} records_per_page={} bitmap_bytes={}",
                header.record_size, header.records_per_page, header.bitmap_bytes
            )));
        }
        Ok(header)
    }

    fn link_offset(&self) -> usize {
        self.bitmap_bytes
    }

    fn slot_offset(&self, slot_id: SlotId) -> usize {
        self.bitmap_bytes + WORD_SIZE + slot_id * self.record_size
    }
}

/// View over one heap data page:
/// `[bitmap_bytes of occupancy bits][free-list link word][slots...]`.
///
/// Works over a shared slice for reads and a mutable one for writes.
pub struct HeapPage<B> {
    buffer: B,
    layout: HeapFileHeader,
}

impl<B: AsRef<[u8]>> HeapPage<B> {
    pub fn new(buffer: B, layout: HeapFileHeader) -> Self {
        Self { buffer, layout }
    }

    pub fn is_slot_used(&self, slot_id: SlotId) -> bool {
        if slot_id >= self.layout.records_per_page {
            return false;
        }
        self.buffer.as_ref()[slot_id / 8] & (1 << (slot_id % 8)) != 0
    }

    /// First unoccupied slot by linear scan, `None` if the page is full
    pub fn first_free_slot(&self) -> Option<SlotId> {
        (0..self.layout.records_per_page).find(|&slot| !self.is_slot_used(slot))
    }

    pub fn is_full(&self) -> bool {
        self.first_free_slot().is_none()
    }

    /// First occupied slot at or after `from`
    pub fn next_used_slot(&self, from: SlotId) -> Option<SlotId> {
        (from..self.layout.records_per_page).find(|&slot| self.is_slot_used(slot))
    }

    pub fn used_slot_count(&self) -> usize {
        (0..self.layout.records_per_page)
            .filter(|&slot| self.is_slot_used(slot))
            .count()
    }

    /// Next page on the free list, only meaningful while this page is listed
    pub fn free_link(&self) -> PageId {
        read_u32(self.buffer.as_ref(), self.layout.link_offset()) as PageId
    }

    pub fn record(&self, slot_id: SlotId) -> &[u8] {
        let start = self.layout.slot_offset(slot_id);
        &self.buffer.as_ref()[start..start + self.layout.record_size]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeapPage<B> {
    pub fn set_slot_used(&mut self, slot_id: SlotId) {
        self.buffer.as_mut()[slot_id / 8] |= 1 << (slot_id % 8);
    }

    pub fn set_slot_free(&mut self, slot_id: SlotId) {
        self.buffer.as_mut()[slot_id / 8] &= !(1 << (slot_id % 8));
    }

    pub fn set_free_link(&mut self, next: PageId) {
        let offset = self.layout.link_offset();
        write_u32(self.buffer.as_mut(), offset, next as u32);
    }

    pub fn write_record(&mut self, slot_id: SlotId, payload: &[u8]) {
        let start = self.layout.slot_offset(slot_id);
        let len = self.layout.record_size;
        self.buffer.as_mut()[start..start + len].copy_from_slice(payload);
    }

    pub fn clear_record(&mut self, slot_id: SlotId) {
        let start = self.layout.slot_offset(slot_id);
        let len = self.layout.record_size;
        self.buffer.as_mut()[start..start + len].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_fits_page() {
        for size in [1, 4, 16, 23, 100, 1000, PAGE_SIZE / 2] {
            let layout = HeapFileHeader::for_record_size(size).unwrap();
            let used = layout.bitmap_bytes + WORD_SIZE + layout.records_per_page * size;
            assert!(used <= PAGE_SIZE, "size {size} overflows");
            // One more record would not fit
            let n = layout.records_per_page + 1;
            assert!(n.div_ceil(8) + WORD_SIZE + n * size > PAGE_SIZE);
        }

        let layout = HeapFileHeader::for_record_size(16).unwrap();
        assert_eq!(layout.records_per_page, 507);
        assert_eq!(layout.bitmap_bytes, 64);
        assert_eq!(HeapFileHeader::for_record_size(PAGE_SIZE / 2).unwrap().records_per_page, 1);
    }

    #[test]
    fn test_layout_rejects_bad_sizes() {
        assert!(matches!(
            HeapFileHeader::for_record_size(PAGE_SIZE / 2 + 1),
            Err(RecordError::RecordTooLarge { .. })
        ));
        assert!(matches!(
            HeapFileHeader::for_record_size(0),
            Err(RecordError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_header_round_trip_and_corruption() {
        let mut header = HeapFileHeader::for_record_size(40).unwrap();
        header.first_free_page = 3;
        header.page_count = 7;

        let mut buf = vec![0u8; PAGE_SIZE];
        header.encode(&mut buf);
        assert_eq!(HeapFileHeader::decode(&buf).unwrap(), header);

        let zeros = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            HeapFileHeader::decode(&zeros),
            Err(RecordError::CorruptedHeader(_))
        ));
    }

    #[test]
    fn test_bitmap_and_slots() {
        let layout = HeapFileHeader::for_record_size(10).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buf[..], layout);

        assert_eq!(page.first_free_slot(), Some(0));
        page.set_slot_used(0);
        page.set_slot_used(1);
        page.set_slot_used(9);
        assert_eq!(page.first_free_slot(), Some(2));
        assert_eq!(page.next_used_slot(2), Some(9));
        assert_eq!(page.used_slot_count(), 3);

        page.write_record(9, &[7u8; 10]);
        assert_eq!(page.record(9), &[7u8; 10]);
        page.clear_record(9);
        page.set_slot_free(9);
        assert_eq!(page.record(9), &[0u8; 10]);
        assert_eq!(page.next_used_slot(2), None);
    }

    #[test]
    fn test_free_link_sits_after_bitmap() {
        let layout = HeapFileHeader::for_record_size(16).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut page = HeapPage::new(&mut buf[..], layout);
            page.set_free_link(12);
            assert_eq!(page.free_link(), 12);
        }
        assert_eq!(read_u32(&buf, layout.bitmap_bytes), 12);
        assert!(buf[..layout.bitmap_bytes].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_page() {
        let layout = HeapFileHeader::for_record_size(PAGE_SIZE / 4).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = HeapPage::new(&mut buf[..], layout);
        for slot in 0..layout.records_per_page {
            assert!(!page.is_full());
            page.set_slot_used(slot);
        }
        assert!(page.is_full());
        assert_eq!(page.first_free_slot(), None);
    }
}
