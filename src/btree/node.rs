//! # Node Views
//!
//! `Node` interprets one page through the tree's slot layout: a key array
//! and a payload array of fixed strides after the 32-byte prefix. On a
//! leaf the payload entries are data tuples; on an inner node their first
//! four bytes are a little-endian child page id (the extra child of an
//! inner node lives at payload index `slot_count`).
//!
//! The bulk-move primitives mirror what split, merge and shift need:
//! in-page range moves (memmove semantics, safe for the overlapping moves
//! rebalancing produces) and cross-page range copies between siblings.
//!
//! A `Node` is a cheap clone: a page handle plus the layout.

use std::ops::Range;

use crate::config::NO_PAGE;
use crate::storage::{PageHandle, PageId, PageLayout};

#[derive(Clone)]
pub struct Node {
    page: PageHandle,
    layout: PageLayout,
}

impl Node {
    pub fn new(page: PageHandle, layout: PageLayout) -> Self {
        Self { page, layout }
    }

    pub fn id(&self) -> PageId {
        self.page.id()
    }

    pub fn page(&self) -> &PageHandle {
        &self.page
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Stamps a freshly allocated page as an empty node at `level`.
    pub fn init(&self, level: i32) {
        let prefix = self.page.prefix_mut();
        prefix.set_level(level);
        prefix.set_slot_count(0);
        prefix.set_prev_leaf(NO_PAGE);
        prefix.set_next_leaf(NO_PAGE);
        prefix.set_slot_capacity(self.layout.slot_capacity as i32);
    }

    pub fn level(&self) -> i32 {
        self.page.prefix().level()
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn slot_count(&self) -> usize {
        self.page.prefix().slot_count() as usize
    }

    pub fn set_slot_count(&self, count: usize) {
        debug_assert!(count <= self.layout.slot_capacity);
        self.page.prefix_mut().set_slot_count(count as i32);
    }

    pub fn prev_leaf(&self) -> PageId {
        self.page.prefix().prev_leaf()
    }

    pub fn set_prev_leaf(&self, id: PageId) {
        self.page.prefix_mut().set_prev_leaf(id);
    }

    pub fn next_leaf(&self) -> PageId {
        self.page.prefix().next_leaf()
    }

    pub fn set_next_leaf(&self, id: PageId) {
        self.page.prefix_mut().set_next_leaf(id);
    }

    pub fn key(&self, slot: usize) -> &[u8] {
        let off = self.layout.key_offset(slot);
        &self.page.bytes()[off..off + self.layout.key_size]
    }

    pub fn set_key(&self, slot: usize, src: &[u8]) {
        debug_assert_eq!(src.len(), self.layout.key_size);
        let off = self.layout.key_offset(slot);
        self.page.bytes_mut()[off..off + self.layout.key_size].copy_from_slice(src);
    }

    /// Data tuple stored in a leaf slot.
    pub fn value(&self, slot: usize) -> &[u8] {
        debug_assert!(self.is_leaf());
        let off = self.layout.payload_offset(slot);
        &self.page.bytes()[off..off + self.layout.data_size]
    }

    pub fn set_value(&self, slot: usize, src: &[u8]) {
        debug_assert!(self.is_leaf());
        debug_assert_eq!(src.len(), self.layout.data_size);
        let off = self.layout.payload_offset(slot);
        self.page.bytes_mut()[off..off + self.layout.data_size].copy_from_slice(src);
    }

    /// Child page id stored in an inner slot. Valid indices run to
    /// `slot_count` inclusive.
    pub fn child(&self, slot: usize) -> PageId {
        debug_assert!(!self.is_leaf());
        let off = self.layout.payload_offset(slot);
        let b = &self.page.bytes()[off..off + 4];
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn set_child(&self, slot: usize, id: PageId) {
        debug_assert!(!self.is_leaf());
        let off = self.layout.payload_offset(slot);
        self.page.bytes_mut()[off..off + 4].copy_from_slice(&id.to_le_bytes());
    }

    /// Moves key slots `src` to start at `dst` within this page. Overlap
    /// is fine (memmove semantics).
    pub fn move_keys_within(&self, src: Range<usize>, dst: usize) {
        if src.start >= src.end || src.start == dst {
            return;
        }
        let len = (src.end - src.start) * self.layout.key_size;
        let src_off = self.layout.key_offset(src.start);
        let dst_off = self.layout.key_offset(dst);
        self.page.bytes_mut().copy_within(src_off..src_off + len, dst_off);
    }

    /// Moves payload slots `src` to start at `dst` within this page; used
    /// for both leaf values and inner child ids.
    pub fn move_payload_within(&self, src: Range<usize>, dst: usize) {
        if src.start >= src.end || src.start == dst {
            return;
        }
        let len = (src.end - src.start) * self.layout.payload_size;
        let src_off = self.layout.payload_offset(src.start);
        let dst_off = self.layout.payload_offset(dst);
        self.page.bytes_mut().copy_within(src_off..src_off + len, dst_off);
    }

    /// Copies key slots `src` of `other` into this page starting at `dst`.
    pub fn copy_keys_from(&self, other: &Node, src: Range<usize>, dst: usize) {
        if src.start >= src.end {
            return;
        }
        debug_assert_ne!(self.id(), other.id());
        let len = (src.end - src.start) * self.layout.key_size;
        let src_off = other.layout.key_offset(src.start);
        let dst_off = self.layout.key_offset(dst);
        self.page.bytes_mut()[dst_off..dst_off + len]
            .copy_from_slice(&other.page.bytes()[src_off..src_off + len]);
    }

    /// Copies payload slots `src` of `other` into this page starting at
    /// `dst`; used for both leaf values and inner child ids.
    pub fn copy_payload_from(&self, other: &Node, src: Range<usize>, dst: usize) {
        if src.start >= src.end {
            return;
        }
        debug_assert_ne!(self.id(), other.id());
        let len = (src.end - src.start) * self.layout.payload_size;
        let src_off = other.layout.payload_offset(src.start);
        let dst_off = self.layout.payload_offset(dst);
        self.page.bytes_mut()[dst_off..dst_off + len]
            .copy_from_slice(&other.page.bytes()[src_off..src_off + len]);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("level", &self.level())
            .field("slots", &self.slot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Schema;
    use crate::storage::PageManager;
    use crate::types::FieldType;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PageManager) {
        let dir = tempdir().unwrap();
        let key = Schema::new([FieldType::Int]).unwrap();
        let data = Schema::new([FieldType::Int]).unwrap();
        let mgr = PageManager::create(&dir.path().join("t"), &key, &data, 64).unwrap();
        (dir, mgr)
    }

    fn alloc_node(mgr: &mut PageManager) -> Node {
        let layout = mgr.layout();
        let page = mgr.allocate_page().unwrap();
        let node = Node::new(page, layout);
        node.init(0);
        node
    }

    fn int_key(v: i32) -> [u8; 4] {
        v.to_le_bytes()
    }

    #[test]
    fn init_stamps_an_empty_leaf() {
        let (_dir, mut mgr) = setup();
        let node = alloc_node(&mut mgr);

        assert!(node.is_leaf());
        assert_eq!(node.slot_count(), 0);
        assert_eq!(node.prev_leaf(), NO_PAGE);
        assert_eq!(node.next_leaf(), NO_PAGE);
    }

    #[test]
    fn key_and_value_slots_roundtrip() {
        let (_dir, mut mgr) = setup();
        let node = alloc_node(&mut mgr);

        node.set_key(0, &int_key(10));
        node.set_key(1, &int_key(20));
        node.set_value(0, &int_key(100));
        node.set_value(1, &int_key(200));
        node.set_slot_count(2);

        assert_eq!(node.key(0), int_key(10));
        assert_eq!(node.key(1), int_key(20));
        assert_eq!(node.value(0), int_key(100));
        assert_eq!(node.value(1), int_key(200));
    }

    #[test]
    fn child_ids_roundtrip_on_inner_nodes() {
        let (_dir, mut mgr) = setup();
        let layout = mgr.layout();
        let page = mgr.allocate_page().unwrap();
        let node = Node::new(page, layout);
        node.init(1);

        node.set_child(0, 5);
        node.set_child(1, -1);
        assert_eq!(node.child(0), 5);
        assert_eq!(node.child(1), -1);
    }

    #[test]
    fn overlapping_move_right_preserves_slots() {
        let (_dir, mut mgr) = setup();
        let node = alloc_node(&mut mgr);

        for i in 0..3 {
            node.set_key(i, &int_key(i as i32));
            node.set_value(i, &int_key(10 * i as i32));
        }
        node.set_slot_count(3);

        // open a gap at slot 0 (shift right by one, overlapping)
        node.move_keys_within(0..3, 1);
        node.move_payload_within(0..3, 1);
        node.set_key(0, &int_key(-1));
        node.set_value(0, &int_key(-10));
        node.set_slot_count(4);

        let keys: Vec<i32> = (0..4)
            .map(|i| i32::from_le_bytes(node.key(i).try_into().unwrap()))
            .collect();
        assert_eq!(keys, [-1, 0, 1, 2]);
        let vals: Vec<i32> = (0..4)
            .map(|i| i32::from_le_bytes(node.value(i).try_into().unwrap()))
            .collect();
        assert_eq!(vals, [-10, 0, 10, 20]);
    }

    #[test]
    fn cross_node_copy_moves_upper_half() {
        let (_dir, mut mgr) = setup();
        let left = alloc_node(&mut mgr);
        let right = alloc_node(&mut mgr);

        for i in 0..4 {
            left.set_key(i, &int_key(i as i32));
            left.set_value(i, &int_key(100 + i as i32));
        }
        left.set_slot_count(4);

        right.copy_keys_from(&left, 2..4, 0);
        right.copy_payload_from(&left, 2..4, 0);
        right.set_slot_count(2);
        left.set_slot_count(2);

        assert_eq!(right.key(0), int_key(2));
        assert_eq!(right.key(1), int_key(3));
        assert_eq!(right.value(0), int_key(102));
        assert_eq!(right.value(1), int_key(103));
    }
}
