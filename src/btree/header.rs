use serde::Serialize;

use super::error::{BPlusTreeError, BPlusTreeResult};
use super::key::{AttrType, KeySchema};
use super::node::NodeLayout;
use crate::file::{PAGE_SIZE, PageId, WORD_SIZE, read_u32, write_u32};

/// Words before the attribute descriptor array
const FIXED_WORDS: usize = 9;

/// Index file header stored in page 0.
///
/// Layout: nine little-endian u32 words
/// `[attr_count][key_len][root][max_children][first_free_page][page_count]`
/// `[key_offset][child_offset][rid_offset]`, then one `(type code, length)`
/// word pair per key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexHeader {
    pub schema: KeySchema,
    pub layout: NodeLayout,
    pub root: PageId,
    pub first_free_page: PageId,
    pub page_count: usize,
}

impl IndexHeader {
    pub const MAX_ATTRS: usize = (PAGE_SIZE - FIXED_WORDS * WORD_SIZE) / (2 * WORD_SIZE);

    /// Header of a freshly created index: root leaf at page 1, free list empty
    pub fn new(attrs: Vec<AttrType>) -> BPlusTreeResult<Self> {
        if attrs.len() > Self::MAX_ATTRS {
            return Err(BPlusTreeError::InvalidKeySchema(format!(
                "{} attributes exceed the limit of {}",
                attrs.len(),
                Self::MAX_ATTRS
            )));
        }
        let schema = KeySchema::new(attrs)?;
        let layout = NodeLayout::new(schema.key_len())?;

        Ok(Self {
            schema,
            layout,
            root: 1,
            first_free_page: 0,
            page_count: 1,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        let attrs = self.schema.attrs();
        write_u32(buf, 0, attrs.len() as u32);
        write_u32(buf, 4, self.schema.key_len() as u32);
        write_u32(buf, 8, self.root as u32);
        write_u32(buf, 12, self.layout.max_children as u32);
        write_u32(buf, 16, self.first_free_page as u32);
        write_u32(buf, 20, self.page_count as u32);
        write_u32(buf, 24, self.layout.key_offset as u32);
        write_u32(buf, 28, self.layout.child_offset as u32);
        write_u32(buf, 32, self.layout.rid_offset as u32);

        for (i, attr) in attrs.iter().enumerate() {
            let offset = (FIXED_WORDS + 2 * i) * WORD_SIZE;
            write_u32(buf, offset, attr.code());
            write_u32(buf, offset + WORD_SIZE, attr.len() as u32);
        }
    }

    pub fn decode(buf: &[u8]) -> BPlusTreeResult<Self> {
        let attr_count = read_u32(buf, 0) as usize;
        if attr_count == 0 || attr_count > Self::MAX_ATTRS {
            return Err(BPlusTreeError::CorruptedHeader(format!(
                "attribute count {attr_count}"
            )));
        }

        let attrs = (0..attr_count)
            .map(|i| {
                let offset = (FIXED_WORDS + 2 * i) * WORD_SIZE;
                AttrType::from_code(
                    read_u32(buf, offset),
                    read_u32(buf, offset + WORD_SIZE) as usize,
                )
            })
            .collect::<BPlusTreeResult<Vec<_>>>()?;
        let schema = KeySchema::new(attrs)?;

        // Stored layout must agree with the one derived from the attributes
        let layout = NodeLayout::new(schema.key_len())?;
        let stored = [
            read_u32(buf, 4) as usize,
            read_u32(buf, 12) as usize,
            read_u32(buf, 24) as usize,
            read_u32(buf, 28) as usize,
            read_u32(buf, 32) as usize,
        ];
        let expected = [
            schema.key_len(),
            layout.max_children,
            layout.key_offset,
            layout.child_offset,
            layout.rid_offset,
        ];
        if stored != expected {
            return Err(BPlusTreeError::CorruptedHeader(format!(
                "stored layout {stored:?} does not match attributes ({expected:?})"
            )));
        }

        let header = Self {
            schema,
            layout,
            root: read_u32(buf, 8) as PageId,
            first_free_page: read_u32(buf, 16) as PageId,
            page_count: read_u32(buf, 20) as usize,
        };
        if header.root == 0 || header.root > header.page_count {
            return Err(BPlusTreeError::CorruptedHeader(format!(
                "root page {} outside 1..={}",
                header.root, header.page_count
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header() {
        let header = IndexHeader::new(vec![AttrType::Int, AttrType::Char(12)]).unwrap();
        assert_eq!(header.schema.key_len(), 16);
        assert_eq!(header.layout.max_children, (PAGE_SIZE - 24) / (16 + 4 + 8));
        assert_eq!(header.root, 1);
        assert_eq!(header.page_count, 1);
        assert_eq!(header.first_free_page, 0);
    }

    #[test]
    fn test_header_round_trip() {
        let mut header =
            IndexHeader::new(vec![AttrType::Float, AttrType::Int, AttrType::Char(3)]).unwrap();
        header.root = 4;
        header.page_count = 9;
        header.first_free_page = 2;

        let mut buf = vec![0u8; PAGE_SIZE];
        header.encode(&mut buf);

        assert_eq!(read_u32(&buf, 0), 3);
        assert_eq!(read_u32(&buf, 36), AttrType::Float.code());
        assert_eq!(read_u32(&buf, 52), 2);
        assert_eq!(read_u32(&buf, 56), 3);
        assert_eq!(IndexHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let zeros = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            IndexHeader::decode(&zeros),
            Err(BPlusTreeError::CorruptedHeader(_))
        ));

        let header = IndexHeader::new(vec![AttrType::Int]).unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        header.encode(&mut buf);
        write_u32(&mut buf, 12, 17);
        assert!(matches!(
            IndexHeader::decode(&buf),
            Err(BPlusTreeError::CorruptedHeader(_))
        ));
    }

    #[test]
    fn test_rejects_too_many_attrs() {
        let attrs = vec![AttrType::Char(1); IndexHeader::MAX_ATTRS + 1];
        assert!(IndexHeader::new(attrs).is_err());
    }
}
