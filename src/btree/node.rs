use serde::Serialize;

use super::error::{BPlusTreeError, BPlusTreeResult};
use crate::file::{PAGE_SIZE, PageId, WORD_SIZE, read_u32, write_u32};
use crate::record::RecordId;

/// Number of header words leading every node page
pub const NODE_HEADER_WORDS: usize = 6;

/// Byte layout shared by every node page of one index.
///
/// A node page is six header words
/// `[is_leaf][key_count][parent][prev][next][next_free]` followed by three
/// parallel arrays of `max_children` slots: keys, child page ids, record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeLayout {
    pub key_len: usize,
    pub max_children: usize,
    pub key_offset: usize,
    pub child_offset: usize,
    pub rid_offset: usize,
}

impl NodeLayout {
    pub fn new(key_len: usize) -> BPlusTreeResult<Self> {
        let header = NODE_HEADER_WORDS * WORD_SIZE;
        let max_children = (PAGE_SIZE - header) / (key_len + WORD_SIZE + RecordId::SIZE);
        if key_len == 0 || max_children < 3 {
            return Err(BPlusTreeError::InvalidKeySchema(format!(
                "key length {key_len} leaves a fan-out of {max_children} (need at least 3)"
            )));
        }

        let child_offset = header + max_children * key_len;
        Ok(Self {
            key_len,
            max_children,
            key_offset: header,
            child_offset,
            rid_offset: child_offset + max_children * WORD_SIZE,
        })
    }
}

/// One key slot. `child` is only meaningful in internal nodes, where `key` and
/// `rid` cache the first entry of that child's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub rid: RecordId,
    pub child: PageId,
}

/// Decoded node page. Links are page ids, 0 meaning none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    pub parent: PageId,
    pub prev: PageId,
    pub next: PageId,
    /// Next page on the index free list, only set while the page is recycled
    pub next_free: PageId,
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn leaf() -> Self {
        Self {
            is_leaf: true,
            parent: 0,
            prev: 0,
            next: 0,
            next_free: 0,
            entries: Vec::new(),
        }
    }

    pub fn internal(parent: PageId, entries: Vec<Entry>) -> Self {
        Self {
            is_leaf: false,
            parent,
            prev: 0,
            next: 0,
            next_free: 0,
            entries,
        }
    }

    /// Position of the entry pointing at `child`
    pub fn child_slot(&self, child: PageId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.child == child)
    }

    pub fn decode(buf: &[u8], layout: &NodeLayout, page_id: PageId) -> BPlusTreeResult<Self> {
        let flag = read_u32(buf, 0);
        let count = read_u32(buf, WORD_SIZE) as usize;
        if flag > 1 || count > layout.max_children {
            return Err(BPlusTreeError::CorruptedNode(page_id));
        }

        let entries = (0..count)
            .map(|i| {
                let key_start = layout.key_offset + i * layout.key_len;
                let rid_start = layout.rid_offset + i * RecordId::SIZE;
                Entry {
                    key: buf[key_start..key_start + layout.key_len].to_vec(),
                    rid: RecordId::new(
                        read_u32(buf, rid_start) as PageId,
                        read_u32(buf, rid_start + WORD_SIZE) as usize,
                    ),
                    child: read_u32(buf, layout.child_offset + i * WORD_SIZE) as PageId,
                }
            })
            .collect();

        Ok(Self {
            is_leaf: flag == 1,
            parent: read_u32(buf, 2 * WORD_SIZE) as PageId,
            prev: read_u32(buf, 3 * WORD_SIZE) as PageId,
            next: read_u32(buf, 4 * WORD_SIZE) as PageId,
            next_free: read_u32(buf, 5 * WORD_SIZE) as PageId,
            entries,
        })
    }

    /// Overwrite the whole page with this node. Unused slots are zeroed.
    pub fn encode(&self, buf: &mut [u8], layout: &NodeLayout) {
        debug_assert!(self.entries.len() <= layout.max_children);
        buf.fill(0);

        write_u32(buf, 0, self.is_leaf as u32);
        write_u32(buf, WORD_SIZE, self.entries.len() as u32);
        write_u32(buf, 2 * WORD_SIZE, self.parent as u32);
        write_u32(buf, 3 * WORD_SIZE, self.prev as u32);
        write_u32(buf, 4 * WORD_SIZE, self.next as u32);
        write_u32(buf, 5 * WORD_SIZE, self.next_free as u32);

        for (i, entry) in self.entries.iter().enumerate() {
            let key_start = layout.key_offset + i * layout.key_len;
            buf[key_start..key_start + layout.key_len].copy_from_slice(&entry.key);
            write_u32(buf, layout.child_offset + i * WORD_SIZE, entry.child as u32);

            let rid_start = layout.rid_offset + i * RecordId::SIZE;
            write_u32(buf, rid_start, entry.rid.page_id as u32);
            write_u32(buf, rid_start + WORD_SIZE, entry.rid.slot_id as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        let layout = NodeLayout::new(4).unwrap();
        assert_eq!(layout.max_children, (PAGE_SIZE - 24) / 16);
        assert_eq!(layout.key_offset, 24);
        assert_eq!(layout.child_offset, 24 + layout.max_children * 4);
        assert_eq!(layout.rid_offset, layout.child_offset + layout.max_children * 4);
        assert!(layout.rid_offset + layout.max_children * RecordId::SIZE <= PAGE_SIZE);

        assert_eq!(NodeLayout::new(2000).unwrap().max_children, 4);
    }

    #[test]
    fn test_layout_rejects_tiny_fan_out() {
        assert!(NodeLayout::new(0).is_err());
        assert!(NodeLayout::new(3000).is_err());
    }

    #[test]
    fn test_node_round_trip() {
        let layout = NodeLayout::new(8).unwrap();
        let mut node = Node::internal(
            3,
            vec![
                Entry {
                    key: vec![1; 8],
                    rid: RecordId::new(2, 7),
                    child: 5,
                },
                Entry {
                    key: vec![9; 8],
                    rid: RecordId::new(4, 0),
                    child: 6,
                },
            ],
        );
        node.next_free = 11;

        let mut buf = vec![0xAAu8; PAGE_SIZE];
        node.encode(&mut buf, &layout);
        let decoded = Node::decode(&buf, &layout, 1).unwrap();

        assert_eq!(decoded, node);
        assert_eq!(decoded.child_slot(6), Some(1));
        assert_eq!(decoded.child_slot(8), None);
    }

    #[test]
    fn test_decode_rejects_bad_count() {
        let layout = NodeLayout::new(2000).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        write_u32(&mut buf, 0, 1);
        write_u32(&mut buf, WORD_SIZE, 5);

        assert!(matches!(
            Node::decode(&buf, &layout, 9),
            Err(BPlusTreeError::CorruptedNode(9))
        ));
    }
}
