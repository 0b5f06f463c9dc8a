use std::fmt;

use serde::Serialize;

use crate::file::PageId;

/// Slot identifier within a page
pub type SlotId = usize;

/// Physical locator of one heap record (page + slot).
///
/// Ordering is lexicographic: page first, then slot. Index entries with equal
/// keys are kept in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    /// On-disk size: two 4-byte words
    pub const SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_id)
    }
}
