//! # Cursors
//!
//! A cursor is a `(leaf, slot)` position. The unique end position of a
//! non-empty tree is `(tail_leaf, tail.slot_count)`; the empty tree's
//! begin and end are both the detached cursor. Stepping is done through
//! [`crate::btree::Tree::advance`] / [`crate::btree::Tree::retreat`],
//! which need the page manager to cross leaf boundaries.
//!
//! A cursor holds a page handle, so the leaf it points into stays mapped
//! for as long as the cursor lives.

use crate::storage::PageId;

use super::node::Node;

#[derive(Clone)]
pub struct Cursor {
    pub(crate) node: Option<Node>,
    pub(crate) slot: usize,
}

impl Cursor {
    pub(crate) fn at(node: Node, slot: usize) -> Self {
        Self {
            node: Some(node),
            slot,
        }
    }

    /// The cursor of the empty tree.
    pub(crate) fn detached() -> Self {
        Self {
            node: None,
            slot: 0,
        }
    }

    /// True at the end position (and on the detached cursor).
    pub fn is_end(&self) -> bool {
        match &self.node {
            Some(node) => self.slot >= node.slot_count(),
            None => true,
        }
    }

    /// Key tuple bytes under the cursor, `None` at end.
    pub fn key(&self) -> Option<&[u8]> {
        match &self.node {
            Some(node) if self.slot < node.slot_count() => Some(node.key(self.slot)),
            _ => None,
        }
    }

    /// Data tuple bytes under the cursor, `None` at end.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.node {
            Some(node) if self.slot < node.slot_count() => Some(node.value(self.slot)),
            _ => None,
        }
    }

    /// `(leaf page id, slot)` of the position, `None` on the detached
    /// cursor.
    pub fn position(&self) -> Option<(PageId, usize)> {
        self.node.as_ref().map(|node| (node.id(), self.slot))
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        let lhs = self.node.as_ref().map(|n| n.id());
        let rhs = other.node.as_ref().map(|n| n.id());
        lhs == rhs && self.slot == other.slot
    }
}

impl Eq for Cursor {}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("leaf", &self.node.as_ref().map(|n| n.id()))
            .field("slot", &self.slot)
            .finish()
    }
}
