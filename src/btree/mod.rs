//! # B+ Tree Engine
//!
//! An ordered map of schema tuples over the page manager. All data lives
//! in level-0 leaves linked into a doubly-linked chain; inner nodes store
//! separator keys and child page ids, where the key at slot `i` equals the
//! maximum key of the subtree under child `i`.
//!
//! ## Module organization
//!
//! - `node`: typed slot access over one page handle
//! - `cursor`: a `(leaf, slot)` position for traversal and targeted erase
//! - `tree`: descent, insert with split propagation, erase with
//!   shift/merge rebalancing, lookups, verification

mod cursor;
mod node;
mod tree;

pub use cursor::Cursor;
pub use node::Node;
pub use tree::{Tree, TreeIter};
