//! Disk-resident B+ tree over composite fixed-length keys
//!
//! Every node lives in one page of the index file and is addressed by page id;
//! nodes are decoded into a [`Node`] on each access and encoded back after a
//! change. Entries are ordered by (key, record id), which makes every entry
//! unique even for duplicate keys. Internal entries cache the first
//! (key, record id) of their child's subtree.
//!
//! Leaves form a doubly linked chain used by the cursor. Deletes reclaim nodes
//! that become empty but never merge or rebalance partially filled ones.

mod error;
mod header;
mod key;
mod node;

pub use error::{BPlusTreeError, BPlusTreeResult};
pub use header::IndexHeader;
pub use key::{AttrType, KeySchema, KeyValue, RidBound};
pub use node::{Entry, NODE_HEADER_WORDS, Node, NodeLayout};

use std::cmp::Ordering;

use log::{debug, trace};

use crate::file::{BufferManager, FileId, PageId};
use crate::record::RecordId;

/// Cursor position. `page == 0` means exhausted; `slot == None` means the last
/// entry of `page`, which is where a backward step onto a new leaf lands.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    page: PageId,
    slot: Option<usize>,
}

/// B+ tree bound to one open index file
#[derive(Debug)]
pub struct BPlusTree {
    file: FileId,
    header: IndexHeader,
    cursor: Cursor,
}

impl BPlusTree {
    /// Load the header of an initialized index file
    pub fn open(buffer_mgr: &mut BufferManager, file: FileId) -> BPlusTreeResult<Self> {
        let header = IndexHeader::decode(buffer_mgr.get_page(file, 0)?)?;
        Ok(Self {
            file,
            header,
            cursor: Cursor::default(),
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn schema(&self) -> &KeySchema {
        &self.header.schema
    }

    /// Insert `(key, rid)`.
    ///
    /// With `unique`, the insert is rejected (`Ok(false)`) when an entry with an
    /// equal key exists. With `probe_only`, the check runs but nothing is
    /// written; the result says whether a real insert would be accepted.
    pub fn insert(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: &[u8],
        rid: RecordId,
        unique: bool,
        probe_only: bool,
    ) -> BPlusTreeResult<bool> {
        self.header.schema.check_len(key)?;

        if unique && self.contains_key(buffer_mgr, key)? {
            debug!("index insert rejected: duplicate key for {rid}");
            return Ok(false);
        }
        if probe_only {
            return Ok(true);
        }

        let bound = RidBound::Exact(rid);
        let (leaf_id, mut leaf) = self.descend(buffer_mgr, key, bound)?;
        let pos = self.lower_bound(&leaf, key, bound);
        leaf.entries.insert(
            pos,
            Entry {
                key: key.to_vec(),
                rid,
                child: 0,
            },
        );
        self.write_node(buffer_mgr, leaf_id, &leaf)?;

        let (top, split) = self.split_upward(buffer_mgr, leaf_id, leaf)?;
        if split {
            self.persist_header(buffer_mgr)?;
        }
        if split || pos == 0 {
            self.refresh_ancestors(buffer_mgr, top)?;
        }
        Ok(true)
    }

    /// Remove the entry matching both `key` and `rid`. Returns `Ok(false)` if
    /// no such entry exists.
    pub fn delete(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: &[u8],
        rid: RecordId,
    ) -> BPlusTreeResult<bool> {
        self.header.schema.check_len(key)?;

        let (leaf_id, mut leaf) = self.descend(buffer_mgr, key, RidBound::Exact(rid))?;
        let Some(pos) = leaf
            .entries
            .iter()
            .position(|entry| entry.rid == rid && self.header.schema.keys_equal(&entry.key, key))
        else {
            return Ok(false);
        };
        leaf.entries.remove(pos);

        if !leaf.entries.is_empty() || leaf_id == self.header.root {
            self.write_node(buffer_mgr, leaf_id, &leaf)?;
            if pos == 0 && !leaf.entries.is_empty() {
                self.refresh_ancestors(buffer_mgr, leaf_id)?;
            }
            return Ok(true);
        }

        // The leaf is empty: unlink it, then drop references upward until an
        // ancestor keeps entries or the root is reached
        self.unlink_leaf(buffer_mgr, &leaf)?;

        let mut node_id = leaf_id;
        let mut node = leaf;
        let mut refresh_from = None;
        loop {
            if node_id == self.header.root {
                node.is_leaf = true;
                node.prev = 0;
                node.next = 0;
                self.write_node(buffer_mgr, node_id, &node)?;
                debug!("index root {node_id} emptied");
                break;
            }

            let parent_id = node.parent;
            self.recycle_page(buffer_mgr, node_id)?;

            let mut parent = self.read_node(buffer_mgr, parent_id)?;
            let slot = parent
                .child_slot(node_id)
                .ok_or(BPlusTreeError::ChildNotFound {
                    parent: parent_id,
                    child: node_id,
                })?;
            parent.entries.remove(slot);
            self.write_node(buffer_mgr, parent_id, &parent)?;

            if !parent.entries.is_empty() {
                refresh_from = Some(parent_id);
                break;
            }
            node_id = parent_id;
            node = parent;
        }

        self.persist_header(buffer_mgr)?;
        if let Some(page_id) = refresh_from {
            self.refresh_ancestors(buffer_mgr, page_id)?;
        }
        Ok(true)
    }

    /// Position the cursor on the first entry with key `>= key` (`inclusive`)
    /// or `> key` (otherwise). Returns whether such an entry exists.
    pub fn scan_from(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: &[u8],
        inclusive: bool,
    ) -> BPlusTreeResult<bool> {
        self.header.schema.check_len(key)?;

        let bound = if inclusive { RidBound::Min } else { RidBound::Max };
        let (leaf_id, leaf) = self.descend(buffer_mgr, key, bound)?;
        let pos = self.lower_bound(&leaf, key, bound);

        self.cursor = if pos < leaf.entries.len() {
            Cursor {
                page: leaf_id,
                slot: Some(pos),
            }
        } else {
            Cursor {
                page: leaf.next,
                slot: Some(0),
            }
        };
        Ok(self.cursor.page != 0)
    }

    /// Position the cursor on the smallest entry
    pub fn scan_first(&mut self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<bool> {
        let (leaf_id, leaf) = self.edge_leaf(buffer_mgr, false)?;
        self.cursor = Cursor {
            page: if leaf.entries.is_empty() { 0 } else { leaf_id },
            slot: Some(0),
        };
        Ok(self.cursor.page != 0)
    }

    /// Position the cursor on the largest entry
    pub fn scan_last(&mut self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<bool> {
        let (leaf_id, leaf) = self.edge_leaf(buffer_mgr, true)?;
        self.cursor = Cursor {
            page: if leaf.entries.is_empty() { 0 } else { leaf_id },
            slot: None,
        };
        Ok(self.cursor.page != 0)
    }

    /// Return the record id under the cursor and step forward
    pub fn next_entry(&mut self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<Option<RecordId>> {
        Ok(self.step(buffer_mgr, true)?.map(|entry| entry.rid))
    }

    /// Return the record id under the cursor and step backward
    pub fn prev_entry(&mut self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<Option<RecordId>> {
        Ok(self.step(buffer_mgr, false)?.map(|entry| entry.rid))
    }

    /// Like [`next_entry`](Self::next_entry), also returning the key
    pub fn next_pair(
        &mut self,
        buffer_mgr: &mut BufferManager,
    ) -> BPlusTreeResult<Option<(Vec<u8>, RecordId)>> {
        Ok(self
            .step(buffer_mgr, true)?
            .map(|entry| (entry.key, entry.rid)))
    }

    /// Like [`prev_entry`](Self::prev_entry), also returning the key
    pub fn prev_pair(
        &mut self,
        buffer_mgr: &mut BufferManager,
    ) -> BPlusTreeResult<Option<(Vec<u8>, RecordId)>> {
        Ok(self
            .step(buffer_mgr, false)?
            .map(|entry| (entry.key, entry.rid)))
    }

    /// Record ids of every entry whose key equals `key`, in rid order.
    ///
    /// Captures the first rid past the key, then walks forward from the first
    /// match until reaching it. Moves the cursor.
    pub fn search_all(
        &mut self,
        buffer_mgr: &mut BufferManager,
        key: &[u8],
    ) -> BPlusTreeResult<Vec<RecordId>> {
        let end = if self.scan_from(buffer_mgr, key, false)? {
            self.next_entry(buffer_mgr)?
        } else {
            None
        };

        let mut rids = Vec::new();
        if !self.scan_from(buffer_mgr, key, true)? {
            return Ok(rids);
        }
        while let Some(rid) = self.next_entry(buffer_mgr)? {
            if Some(rid) == end {
                break;
            }
            rids.push(rid);
        }
        Ok(rids)
    }

    /// Entries with `lower <= key <= upper` in order. Moves the cursor.
    pub fn range_search(
        &mut self,
        buffer_mgr: &mut BufferManager,
        lower: &[u8],
        upper: &[u8],
    ) -> BPlusTreeResult<Vec<(Vec<u8>, RecordId)>> {
        self.header.schema.check_len(upper)?;

        let mut results = Vec::new();
        if !self.scan_from(buffer_mgr, lower, true)? {
            return Ok(results);
        }
        while let Some((key, rid)) = self.next_pair(buffer_mgr)? {
            if self.header.schema.compare(&key, upper) == Ordering::Greater {
                break;
            }
            results.push((key, rid));
        }
        Ok(results)
    }

    /// Number of entries, counted along the leaf chain
    pub fn len(&self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<usize> {
        let (mut page_id, _) = self.edge_leaf(buffer_mgr, false)?;
        let mut count = 0;
        while page_id != 0 {
            let leaf = self.read_node(buffer_mgr, page_id)?;
            count += leaf.entries.len();
            page_id = leaf.next;
        }
        Ok(count)
    }

    pub fn is_empty(&self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<bool> {
        let root = self.read_node(buffer_mgr, self.header.root)?;
        Ok(root.entries.is_empty())
    }

    /// Levels from root to leaf, 1 for a lone root leaf
    pub fn height(&self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<usize> {
        let mut height = 1;
        let mut node = self.read_node(buffer_mgr, self.header.root)?;
        while !node.is_leaf {
            let Some(first) = node.entries.first() else {
                break;
            };
            node = self.read_node(buffer_mgr, first.child)?;
            height += 1;
        }
        Ok(height)
    }

    /// Write the in-memory header to page 0 and flush it
    pub fn persist_header(&self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<()> {
        self.header.encode(buffer_mgr.get_page_mut(self.file, 0)?);
        buffer_mgr.write_back(self.file, 0)?;
        Ok(())
    }

    /// Compare an entry against a probe `(key, bound)`
    fn compare_entry(&self, entry: &Entry, key: &[u8], bound: RidBound) -> Ordering {
        self.header
            .schema
            .compare(&entry.key, key)
            .then_with(|| RidBound::Exact(entry.rid).cmp(&bound))
    }

    /// Index of the first entry not below the probe
    fn lower_bound(&self, node: &Node, key: &[u8], bound: RidBound) -> usize {
        node.entries
            .partition_point(|entry| self.compare_entry(entry, key, bound) == Ordering::Less)
    }

    /// Rightmost child whose cached first entry is `<=` the probe, or the
    /// first child when the probe precedes them all
    fn child_index(&self, node: &Node, key: &[u8], bound: RidBound) -> usize {
        node.entries
            .iter()
            .rposition(|entry| self.compare_entry(entry, key, bound) != Ordering::Greater)
            .unwrap_or(0)
    }

    fn descend(
        &self,
        buffer_mgr: &mut BufferManager,
        key: &[u8],
        bound: RidBound,
    ) -> BPlusTreeResult<(PageId, Node)> {
        let mut page_id = self.header.root;
        let mut node = self.read_node(buffer_mgr, page_id)?;
        while !node.is_leaf {
            if node.entries.is_empty() {
                return Err(BPlusTreeError::CorruptedNode(page_id));
            }
            page_id = node.entries[self.child_index(&node, key, bound)].child;
            node = self.read_node(buffer_mgr, page_id)?;
        }
        Ok((page_id, node))
    }

    /// Leftmost (`last == false`) or rightmost leaf
    fn edge_leaf(&self, buffer_mgr: &mut BufferManager, last: bool) -> BPlusTreeResult<(PageId, Node)> {
        let mut page_id = self.header.root;
        let mut node = self.read_node(buffer_mgr, page_id)?;
        while !node.is_leaf {
            let edge = if last {
                node.entries.last()
            } else {
                node.entries.first()
            };
            page_id = edge.ok_or(BPlusTreeError::CorruptedNode(page_id))?.child;
            node = self.read_node(buffer_mgr, page_id)?;
        }
        Ok((page_id, node))
    }

    /// Exact key match at the leftmost candidate slot, or at the head of the
    /// following leaf when the candidate falls past the end of its leaf
    fn contains_key(&self, buffer_mgr: &mut BufferManager, key: &[u8]) -> BPlusTreeResult<bool> {
        let (_, leaf) = self.descend(buffer_mgr, key, RidBound::Min)?;
        let pos = self.lower_bound(&leaf, key, RidBound::Min);

        if let Some(entry) = leaf.entries.get(pos) {
            return Ok(self.header.schema.keys_equal(&entry.key, key));
        }
        if leaf.next == 0 {
            return Ok(false);
        }
        let next = self.read_node(buffer_mgr, leaf.next)?;
        Ok(next
            .entries
            .first()
            .is_some_and(|entry| self.header.schema.keys_equal(&entry.key, key)))
    }

    /// Split `node` while it is at capacity, then repeat on its parent.
    ///
    /// Returns the topmost page touched and whether any split happened.
    fn split_upward(
        &mut self,
        buffer_mgr: &mut BufferManager,
        mut node_id: PageId,
        mut node: Node,
    ) -> BPlusTreeResult<(PageId, bool)> {
        let mut split = false;

        while node.entries.len() >= self.header.layout.max_children {
            split = true;
            let sibling_id = self.allocate_page(buffer_mgr)?;
            let keep = node.entries.len() / 2;
            let mut sibling = Node {
                is_leaf: node.is_leaf,
                parent: node.parent,
                prev: 0,
                next: 0,
                next_free: 0,
                entries: node.entries.split_off(keep),
            };

            if node.is_leaf {
                sibling.prev = node_id;
                sibling.next = node.next;
                if node.next != 0 {
                    let mut after = self.read_node(buffer_mgr, node.next)?;
                    after.prev = sibling_id;
                    self.write_node(buffer_mgr, node.next, &after)?;
                }
                node.next = sibling_id;
            } else {
                for entry in &sibling.entries {
                    let mut child = self.read_node(buffer_mgr, entry.child)?;
                    child.parent = sibling_id;
                    self.write_node(buffer_mgr, entry.child, &child)?;
                }
            }

            let (parent_id, mut parent) = if node.parent == 0 {
                let root_id = self.allocate_page(buffer_mgr)?;
                let root = Node::internal(
                    0,
                    vec![Entry {
                        key: node.entries[0].key.clone(),
                        rid: node.entries[0].rid,
                        child: node_id,
                    }],
                );
                node.parent = root_id;
                sibling.parent = root_id;
                self.header.root = root_id;
                debug!("index root grew: new root page {root_id}");
                (root_id, root)
            } else {
                (node.parent, self.read_node(buffer_mgr, node.parent)?)
            };

            let slot = parent
                .child_slot(node_id)
                .ok_or(BPlusTreeError::ChildNotFound {
                    parent: parent_id,
                    child: node_id,
                })?;
            parent.entries[slot].key = node.entries[0].key.clone();
            parent.entries[slot].rid = node.entries[0].rid;
            parent.entries.insert(
                slot + 1,
                Entry {
                    key: sibling.entries[0].key.clone(),
                    rid: sibling.entries[0].rid,
                    child: sibling_id,
                },
            );

            self.write_node(buffer_mgr, node_id, &node)?;
            self.write_node(buffer_mgr, sibling_id, &sibling)?;
            self.write_node(buffer_mgr, parent_id, &parent)?;
            debug!("index split page {node_id} into {sibling_id} under {parent_id}");

            node_id = parent_id;
            node = parent;
        }

        Ok((node_id, split))
    }

    /// Rewrite the cached first entry in each ancestor of `page_id`
    fn refresh_ancestors(&self, buffer_mgr: &mut BufferManager, page_id: PageId) -> BPlusTreeResult<()> {
        let mut child_id = page_id;
        let mut child = self.read_node(buffer_mgr, child_id)?;

        while child_id != self.header.root {
            let Some(first) = child.entries.first() else {
                break;
            };
            let parent_id = child.parent;
            let mut parent = self.read_node(buffer_mgr, parent_id)?;
            let slot = parent
                .child_slot(child_id)
                .ok_or(BPlusTreeError::ChildNotFound {
                    parent: parent_id,
                    child: child_id,
                })?;

            if parent.entries[slot].key != first.key || parent.entries[slot].rid != first.rid {
                parent.entries[slot].key = first.key.clone();
                parent.entries[slot].rid = first.rid;
                self.write_node(buffer_mgr, parent_id, &parent)?;
            }
            child_id = parent_id;
            child = parent;
        }
        Ok(())
    }

    fn unlink_leaf(&self, buffer_mgr: &mut BufferManager, leaf: &Node) -> BPlusTreeResult<()> {
        if leaf.prev != 0 {
            let mut before = self.read_node(buffer_mgr, leaf.prev)?;
            before.next = leaf.next;
            self.write_node(buffer_mgr, leaf.prev, &before)?;
        }
        if leaf.next != 0 {
            let mut after = self.read_node(buffer_mgr, leaf.next)?;
            after.prev = leaf.prev;
            self.write_node(buffer_mgr, leaf.next, &after)?;
        }
        Ok(())
    }

    /// Take a page from the free list, or grow the file by one page.
    /// The caller persists the header.
    fn allocate_page(&mut self, buffer_mgr: &mut BufferManager) -> BPlusTreeResult<PageId> {
        if self.header.first_free_page != 0 {
            let page_id = self.header.first_free_page;
            let freed = self.read_node(buffer_mgr, page_id)?;
            self.header.first_free_page = freed.next_free;
            debug!("index page {page_id} reused from free list");
            return Ok(page_id);
        }

        self.header.page_count += 1;
        trace!("index page {} allocated", self.header.page_count);
        Ok(self.header.page_count)
    }

    /// Push a page onto the free list. The caller persists the header.
    fn recycle_page(&mut self, buffer_mgr: &mut BufferManager, page_id: PageId) -> BPlusTreeResult<()> {
        let mut freed = Node::leaf();
        freed.next_free = self.header.first_free_page;
        self.write_node(buffer_mgr, page_id, &freed)?;
        self.header.first_free_page = page_id;
        debug!("index page {page_id} recycled");
        Ok(())
    }

    /// Return the entry under the cursor and move one step
    fn step(&mut self, buffer_mgr: &mut BufferManager, forward: bool) -> BPlusTreeResult<Option<Entry>> {
        if self.cursor.page == 0 {
            return Ok(None);
        }

        let mut node = self.read_node(buffer_mgr, self.cursor.page)?;
        let len = node.entries.len();
        let slot = self.cursor.slot.unwrap_or(len.saturating_sub(1));
        if slot >= len {
            self.cursor = Cursor::default();
            return Ok(None);
        }

        self.cursor = if forward && slot + 1 == len {
            Cursor {
                page: node.next,
                slot: Some(0),
            }
        } else if forward {
            Cursor {
                page: self.cursor.page,
                slot: Some(slot + 1),
            }
        } else if slot == 0 {
            Cursor {
                page: node.prev,
                slot: None,
            }
        } else {
            Cursor {
                page: self.cursor.page,
                slot: Some(slot - 1),
            }
        };
        Ok(Some(node.entries.swap_remove(slot)))
    }

    fn read_node(&self, buffer_mgr: &mut BufferManager, page_id: PageId) -> BPlusTreeResult<Node> {
        let buf = buffer_mgr.get_page(self.file, page_id)?;
        Node::decode(buf, &self.header.layout, page_id)
    }

    fn write_node(&self, buffer_mgr: &mut BufferManager, page_id: PageId, node: &Node) -> BPlusTreeResult<()> {
        let buf = buffer_mgr.get_page_mut(self.file, page_id)?;
        node.encode(buf, &self.header.layout);
        Ok(())
    }
}
