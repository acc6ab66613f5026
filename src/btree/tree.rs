//! # Tree Engine
//!
//! The ordered map `key tuple -> data tuple` over the page manager.
//!
//! ## Insert
//!
//! Top-down descent choosing the lower-bound slot, recursive split
//! propagation on the way back up. A leaf split moves the upper half into
//! a fresh right sibling and reports the left node's new last key as the
//! separator; an inner split promotes the median key. When the root
//! splits, a new root one level up takes the promoted key and both
//! halves.
//!
//! ## Erase
//!
//! The descent tracks five neighbours of the current node: the adjacent
//! left and right siblings and their parents, plus the direct parent with
//! the descended-into slot. After removal, an underflowing node is
//! repaired by one of six cases: merge with a sibling under the shared
//! parent, or shift entries from whichever adjacent sibling can spare
//! them. Merges report `fix_merge` upward so the parent drops the emptied
//! child; last-key removals that cannot be patched locally bubble an
//! `update last key` signal instead. Both signals stay internal.
//!
//! Duplicate keys are allowed. `insert` therefore always reports the pair
//! as inserted, and `find` returns the first equal key in chain order.

use std::cmp::Ordering;
use std::path::Path;

use eyre::{ensure, eyre, Result};

use crate::config::NO_PAGE;
use crate::records::Schema;
use crate::storage::{PageId, PageLayout, PageManager};

use super::cursor::Cursor;
use super::node::Node;

pub struct Tree {
    pager: PageManager,
    key_schema: Schema,
    data_schema: Schema,
    layout: PageLayout,
    min_slots: usize,
}

/// Split outcome propagated up the insert path.
struct Split {
    key: Vec<u8>,
    node: Node,
}

/// Internal erase signals; `fix_merge` and `last_key` can be set together.
#[derive(Debug, Default)]
struct EraseFlags {
    not_found: bool,
    fix_merge: bool,
    last_key: Option<Vec<u8>>,
}

impl EraseFlags {
    fn not_found() -> Self {
        Self {
            not_found: true,
            ..Default::default()
        }
    }

    fn fix_merge() -> Self {
        Self {
            fix_merge: true,
            ..Default::default()
        }
    }

    fn absorb(&mut self, other: EraseFlags) {
        self.fix_merge |= other.fix_merge;
        if other.last_key.is_some() {
            self.last_key = other.last_key;
        }
    }
}

fn same_node(a: Option<&Node>, b: Option<&Node>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.id() == b.id(),
        _ => false,
    }
}

impl Tree {
    /// Creates the file pair for an empty tree and opens it.
    pub fn create<P: AsRef<Path>>(
        path: P,
        key_schema: Schema,
        data_schema: Schema,
        page_bytes: usize,
    ) -> Result<Self> {
        let pager = PageManager::create(path.as_ref(), &key_schema, &data_schema, page_bytes)?;
        let layout = pager.layout();
        let min_slots = layout.slot_capacity / 2;

        Ok(Self {
            pager,
            key_schema,
            data_schema,
            layout,
            min_slots,
        })
    }

    /// Opens an existing tree, re-deriving schemas and geometry from the
    /// header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pager = PageManager::open(path.as_ref())?;
        let key_schema = pager.decode_key_schema()?;
        let data_schema = pager.decode_data_schema()?;
        let layout = pager.layout();
        let min_slots = layout.slot_capacity / 2;

        Ok(Self {
            pager,
            key_schema,
            data_schema,
            layout,
            min_slots,
        })
    }

    pub fn is_open(&self) -> bool {
        self.pager.is_open()
    }

    /// Flushes and detaches from the file pair. Further operations fail.
    pub fn close(&mut self) -> Result<()> {
        self.pager.sync()?;
        self.pager.close()
    }

    /// Flushes every resident page and the header.
    pub fn sync(&self) -> Result<()> {
        self.pager.sync()
    }

    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    pub fn data_schema(&self) -> &Schema {
        &self.data_schema
    }

    pub fn slot_capacity(&self) -> usize {
        self.layout.slot_capacity
    }

    pub fn len(&self) -> Result<u64> {
        self.pager.item_count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn pager(&self) -> &PageManager {
        &self.pager
    }

    // ---- lookups ------------------------------------------------------

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        match self.descend_lower(key)? {
            Some((leaf, slot)) => Ok(slot < leaf.slot_count()
                && self.key_schema.compare(key, leaf.key(slot)) == Ordering::Equal),
            None => Ok(false),
        }
    }

    /// Cursor at the first equal key, or `end` if absent.
    pub fn find(&self, key: &[u8]) -> Result<Cursor> {
        self.check_key(key)?;
        match self.descend_lower(key)? {
            Some((leaf, slot)) => {
                if slot < leaf.slot_count()
                    && self.key_schema.compare(key, leaf.key(slot)) == Ordering::Equal
                {
                    Ok(Cursor::at(leaf, slot))
                } else {
                    self.end()
                }
            }
            None => self.end(),
        }
    }

    /// Cursor at the first key not less than `key`.
    pub fn lower_bound(&self, key: &[u8]) -> Result<Cursor> {
        self.check_key(key)?;
        match self.descend_lower(key)? {
            Some((leaf, slot)) => Ok(Cursor::at(leaf, slot)),
            None => self.end(),
        }
    }

    /// Cursor at the first key greater than `key`.
    pub fn upper_bound(&self, key: &[u8]) -> Result<Cursor> {
        self.check_key(key)?;
        let root_id = self.pager.root_page()?;
        if root_id == NO_PAGE {
            return self.end();
        }

        let mut node = self.node(root_id)?;
        while !node.is_leaf() {
            let slot = self.find_upper(&node, key);
            node = self.node(node.child(slot))?;
        }
        let slot = self.find_upper(&node, key);
        Ok(Cursor::at(node, slot))
    }

    /// Number of entries equal to `key`.
    pub fn count(&self, key: &[u8]) -> Result<usize> {
        self.check_key(key)?;
        let Some((leaf, slot)) = self.descend_lower(key)? else {
            return Ok(0);
        };

        let mut num = 0;
        let mut current = Some(leaf);
        let mut slot = slot;
        while let Some(leaf) = current {
            if slot >= leaf.slot_count()
                || self.key_schema.compare(key, leaf.key(slot)) != Ordering::Equal
            {
                break;
            }
            num += 1;
            slot += 1;
            if slot >= leaf.slot_count() {
                current = self.sibling(leaf.next_leaf())?;
                slot = 0;
            } else {
                current = Some(leaf);
            }
        }
        Ok(num)
    }

    // ---- traversal ----------------------------------------------------

    pub fn begin(&self) -> Result<Cursor> {
        let head = self.pager.head_leaf()?;
        if head == NO_PAGE {
            return Ok(Cursor::detached());
        }
        Ok(Cursor::at(self.node(head)?, 0))
    }

    pub fn end(&self) -> Result<Cursor> {
        let tail = self.pager.tail_leaf()?;
        if tail == NO_PAGE {
            return Ok(Cursor::detached());
        }
        let node = self.node(tail)?;
        let slot = node.slot_count();
        Ok(Cursor::at(node, slot))
    }

    /// Steps the cursor forward; the end position is absorbing.
    pub fn advance(&self, cursor: &mut Cursor) -> Result<()> {
        let Some(node) = cursor.node.clone() else {
            return Ok(());
        };
        if cursor.slot + 1 < node.slot_count() {
            cursor.slot += 1;
        } else if node.next_leaf() != NO_PAGE {
            cursor.node = Some(self.node(node.next_leaf())?);
            cursor.slot = 0;
        } else {
            cursor.slot = node.slot_count();
        }
        Ok(())
    }

    /// Steps the cursor backward; the begin position is absorbing.
    pub fn retreat(&self, cursor: &mut Cursor) -> Result<()> {
        let Some(node) = cursor.node.clone() else {
            return Ok(());
        };
        if cursor.slot > 0 {
            cursor.slot -= 1;
        } else if node.prev_leaf() != NO_PAGE {
            let prev = self.node(node.prev_leaf())?;
            cursor.slot = prev.slot_count().saturating_sub(1);
            cursor.node = Some(prev);
        }
        Ok(())
    }

    /// Forward iterator over `(key, data)` byte pairs.
    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter {
            tree: self,
            cursor: None,
            finished: false,
        }
    }

    // ---- insert -------------------------------------------------------

    /// Inserts a `(key, data)` pair. Duplicates are allowed, so the
    /// reported flag is always true.
    pub fn insert(&mut self, key: &[u8], data: &[u8]) -> Result<(Cursor, bool)> {
        self.check_key(key)?;
        ensure!(
            data.len() == self.data_schema.width(),
            "schema mismatch: data tuple is {} bytes, data schema width is {}",
            data.len(),
            self.data_schema.width()
        );

        if self.pager.root_page()? == NO_PAGE {
            let leaf = self.allocate_leaf()?;
            self.pager.set_root_page(leaf.id())?;
            self.pager.set_head_leaf(leaf.id())?;
            self.pager.set_tail_leaf(leaf.id())?;
        }

        let root = self.node(self.pager.root_page()?)?;
        let root_id = root.id();
        let root_level = root.level();

        let (leaf, slot, split) = self.insert_descend(root, key, data)?;

        if let Some(split) = split {
            let new_root = self.allocate_inner(root_level + 1)?;
            new_root.set_key(0, &split.key);
            new_root.set_child(0, root_id);
            new_root.set_child(1, split.node.id());
            new_root.set_slot_count(1);
            self.pager.set_root_page(new_root.id())?;
        }

        self.pager.inc_item_count()?;
        Ok((Cursor::at(leaf, slot), true))
    }

    fn insert_descend(
        &mut self,
        node: Node,
        key: &[u8],
        data: &[u8],
    ) -> Result<(Node, usize, Option<Split>)> {
        if node.is_leaf() {
            return self.insert_into_leaf(node, key, data);
        }

        let mut inner = node;
        let mut slot = self.find_lower(&inner, key);
        let child = self.node(inner.child(slot))?;
        let (leaf, leaf_slot, child_split) = self.insert_descend(child, key, data)?;

        let Some(child_split) = child_split else {
            return Ok((leaf, leaf_slot, None));
        };

        let mut my_split = None;
        if self.is_full(&inner) {
            let (sep, right) = self.split_inner(&inner, slot)?;

            if slot == inner.slot_count() + 1 && inner.slot_count() < right.slot_count() {
                // the insert slot falls exactly between the two halves:
                // the pending key becomes the promoted separator and the
                // pending child becomes the right half's first child
                let count = inner.slot_count();
                inner.set_key(count, &sep);
                inner.set_child(count + 1, right.child(0));
                inner.set_slot_count(count + 1);
                right.set_child(0, child_split.node.id());
                return Ok((
                    leaf,
                    leaf_slot,
                    Some(Split {
                        key: child_split.key,
                        node: right,
                    }),
                ));
            } else if slot >= inner.slot_count() + 1 {
                slot -= inner.slot_count() + 1;
                inner = right.clone();
            }

            my_split = Some(Split {
                key: sep,
                node: right,
            });
        }

        let count = inner.slot_count();
        inner.move_keys_within(slot..count, slot + 1);
        inner.move_payload_within(slot..count + 1, slot + 1);
        inner.set_key(slot, &child_split.key);
        inner.set_child(slot + 1, child_split.node.id());
        inner.set_slot_count(count + 1);

        Ok((leaf, leaf_slot, my_split))
    }

    fn insert_into_leaf(
        &mut self,
        node: Node,
        key: &[u8],
        data: &[u8],
    ) -> Result<(Node, usize, Option<Split>)> {
        let mut leaf = node;
        let mut slot = self.find_lower(&leaf, key);
        let mut split = None;
        let mut in_original = true;

        if self.is_full(&leaf) {
            let (sep, right) = self.split_leaf(&leaf)?;
            if slot >= leaf.slot_count() {
                slot -= leaf.slot_count();
                leaf = right.clone();
                in_original = false;
            }
            split = Some(Split {
                key: sep,
                node: right,
            });
        }

        let count = leaf.slot_count();
        leaf.move_keys_within(slot..count, slot + 1);
        leaf.move_payload_within(slot..count, slot + 1);
        leaf.set_key(slot, key);
        leaf.set_value(slot, data);
        leaf.set_slot_count(count + 1);

        if let Some(split) = &mut split {
            if in_original && slot == leaf.slot_count() - 1 {
                // the new key is now the left node's maximum, so it is the
                // separator the parent must install
                split.key = key.to_vec();
            }
        }

        Ok((leaf, slot, split))
    }

    /// Splits a full leaf, linking the new right sibling into the chain.
    /// Keys and values both move; the separator is the left half's new
    /// last key.
    fn split_leaf(&mut self, leaf: &Node) -> Result<(Vec<u8>, Node)> {
        let count = leaf.slot_count();
        let mid = count / 2;
        let right = self.allocate_leaf()?;

        right.set_slot_count(count - mid);
        right.set_next_leaf(leaf.next_leaf());
        if right.next_leaf() == NO_PAGE {
            self.pager.set_tail_leaf(right.id())?;
        } else {
            let next = self.node(right.next_leaf())?;
            next.set_prev_leaf(right.id());
        }

        right.copy_keys_from(leaf, mid..count, 0);
        right.copy_payload_from(leaf, mid..count, 0);

        leaf.set_slot_count(mid);
        leaf.set_next_leaf(right.id());
        right.set_prev_leaf(leaf.id());

        Ok((leaf.key(mid - 1).to_vec(), right))
    }

    /// Splits a full inner node around the median, biased so the pending
    /// insert at `add_slot` cannot underfill the smaller half. The median
    /// key is promoted, not kept.
    fn split_inner(&mut self, inner: &Node, add_slot: usize) -> Result<(Vec<u8>, Node)> {
        let count = inner.slot_count();
        let mut mid = count / 2;
        if add_slot <= mid && mid > count - (mid + 1) {
            mid -= 1;
        }

        let right = self.allocate_inner(inner.level())?;
        right.set_slot_count(count - (mid + 1));
        right.copy_keys_from(inner, mid + 1..count, 0);
        right.copy_payload_from(inner, mid + 1..count + 1, 0);

        inner.set_slot_count(mid);
        Ok((inner.key(mid).to_vec(), right))
    }

    // ---- erase --------------------------------------------------------

    /// Removes the first entry equal to `key`.
    pub fn erase_one(&mut self, key: &[u8]) -> Result<bool> {
        self.check_key(key)?;
        let root_id = self.pager.root_page()?;
        if root_id == NO_PAGE {
            return Ok(false);
        }

        let root = self.node(root_id)?;
        let result = self.erase_key_descend(key, root, None, None, None, None, None, 0)?;

        if !result.not_found {
            self.pager.dec_item_count()?;
        }
        Ok(!result.not_found)
    }

    /// Removes every entry equal to `key`, returning how many went away.
    pub fn erase(&mut self, key: &[u8]) -> Result<usize> {
        let mut erased = 0;
        while self.erase_one(key)? {
            erased += 1;
        }
        Ok(erased)
    }

    /// Removes the entry under the cursor.
    pub fn erase_at(&mut self, cursor: &Cursor) -> Result<bool> {
        let Some((target_leaf, target_slot)) = cursor.position() else {
            return Ok(false);
        };
        let Some(key) = cursor.key().map(<[u8]>::to_vec) else {
            return Ok(false);
        };

        let root_id = self.pager.root_page()?;
        if root_id == NO_PAGE {
            return Ok(false);
        }

        let root = self.node(root_id)?;
        let result = self.erase_at_descend(
            &key,
            target_leaf,
            target_slot,
            root,
            None,
            None,
            None,
            None,
            None,
            0,
        )?;

        if !result.not_found {
            self.pager.dec_item_count()?;
        }
        Ok(!result.not_found)
    }

    #[allow(clippy::too_many_arguments)]
    fn erase_key_descend(
        &mut self,
        key: &[u8],
        curr: Node,
        left: Option<Node>,
        right: Option<Node>,
        left_parent: Option<Node>,
        right_parent: Option<Node>,
        parent: Option<Node>,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        if curr.is_leaf() {
            let slot = self.find_lower(&curr, key);
            if slot >= curr.slot_count()
                || self.key_schema.compare(key, curr.key(slot)) != Ordering::Equal
            {
                return Ok(EraseFlags::not_found());
            }
            return self.erase_in_leaf(
                &curr,
                slot,
                left.as_ref(),
                right.as_ref(),
                left_parent.as_ref(),
                right_parent.as_ref(),
                parent.as_ref(),
                parent_slot,
            );
        }

        let inner = curr;
        let slot = self.find_lower(&inner, key);

        let (my_left, my_left_parent) = if slot == 0 {
            let node = match &left {
                Some(left) => Some(self.node(left.child(left.slot_count()))?),
                None => None,
            };
            (node, left_parent.clone())
        } else {
            (
                Some(self.node(inner.child(slot - 1))?),
                Some(inner.clone()),
            )
        };

        let (my_right, my_right_parent) = if slot == inner.slot_count() {
            let node = match &right {
                Some(right) => Some(self.node(right.child(0))?),
                None => None,
            };
            (node, right_parent.clone())
        } else {
            (
                Some(self.node(inner.child(slot + 1))?),
                Some(inner.clone()),
            )
        };

        let child = self.node(inner.child(slot))?;
        let result = self.erase_key_descend(
            key,
            child,
            my_left,
            my_right,
            my_left_parent,
            my_right_parent,
            Some(inner.clone()),
            slot,
        )?;

        if result.not_found {
            return Ok(result);
        }

        self.finish_inner(
            &inner,
            slot,
            result,
            left.as_ref(),
            right.as_ref(),
            left_parent.as_ref(),
            right_parent.as_ref(),
            parent.as_ref(),
            parent_slot,
        )
    }

    /// Cursor-targeted descent: probes every candidate child from the
    /// lower-bound slot rightward until the target leaf answers, giving up
    /// once the separator key passes the cursor's key.
    #[allow(clippy::too_many_arguments)]
    fn erase_at_descend(
        &mut self,
        key: &[u8],
        target_leaf: PageId,
        target_slot: usize,
        curr: Node,
        left: Option<Node>,
        right: Option<Node>,
        left_parent: Option<Node>,
        right_parent: Option<Node>,
        parent: Option<Node>,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        if curr.is_leaf() {
            if curr.id() != target_leaf || target_slot >= curr.slot_count() {
                return Ok(EraseFlags::not_found());
            }
            return self.erase_in_leaf(
                &curr,
                target_slot,
                left.as_ref(),
                right.as_ref(),
                left_parent.as_ref(),
                right_parent.as_ref(),
                parent.as_ref(),
                parent_slot,
            );
        }

        let inner = curr;
        let mut slot = self.find_lower(&inner, key);
        let mut result = EraseFlags::not_found();

        while slot <= inner.slot_count() {
            let (my_left, my_left_parent) = if slot == 0 {
                let node = match &left {
                    Some(left) => Some(self.node(left.child(left.slot_count()))?),
                    None => None,
                };
                (node, left_parent.clone())
            } else {
                (
                    Some(self.node(inner.child(slot - 1))?),
                    Some(inner.clone()),
                )
            };

            let (my_right, my_right_parent) = if slot == inner.slot_count() {
                let node = match &right {
                    Some(right) => Some(self.node(right.child(0))?),
                    None => None,
                };
                (node, right_parent.clone())
            } else {
                (
                    Some(self.node(inner.child(slot + 1))?),
                    Some(inner.clone()),
                )
            };

            let child = self.node(inner.child(slot))?;
            result = self.erase_at_descend(
                key,
                target_leaf,
                target_slot,
                child,
                my_left,
                my_right,
                my_left_parent,
                my_right_parent,
                Some(inner.clone()),
                slot,
            )?;

            if !result.not_found {
                break;
            }

            if slot < inner.slot_count()
                && self.key_schema.compare(inner.key(slot), key) == Ordering::Less
            {
                return Ok(EraseFlags::not_found());
            }
            slot += 1;
        }

        if slot > inner.slot_count() {
            return Ok(EraseFlags::not_found());
        }

        self.finish_inner(
            &inner,
            slot,
            result,
            left.as_ref(),
            right.as_ref(),
            left_parent.as_ref(),
            right_parent.as_ref(),
            parent.as_ref(),
            parent_slot,
        )
    }

    /// Removes slot `slot` from a leaf, patches the parent separator when
    /// the last key changed, and repairs underflow by the six-way case
    /// table.
    #[allow(clippy::too_many_arguments)]
    fn erase_in_leaf(
        &mut self,
        leaf: &Node,
        slot: usize,
        left: Option<&Node>,
        right: Option<&Node>,
        left_parent: Option<&Node>,
        right_parent: Option<&Node>,
        parent: Option<&Node>,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        let count = leaf.slot_count();
        leaf.move_keys_within(slot + 1..count, slot);
        leaf.move_payload_within(slot + 1..count, slot);
        leaf.set_slot_count(count - 1);
        let count = count - 1;

        let mut my_res = EraseFlags::default();

        if slot == count {
            // the removed slot was the last one: the separator above must
            // follow the new last key
            match parent {
                Some(parent) if parent_slot < parent.slot_count() => {
                    if count >= 1 {
                        parent.set_key(parent_slot, leaf.key(count - 1));
                    }
                }
                _ => {
                    if count >= 1 {
                        my_res.last_key = Some(leaf.key(count - 1).to_vec());
                    }
                }
            }
        }

        let root_id = self.pager.root_page()?;
        if self.is_underflow(leaf) && !(leaf.id() == root_id && leaf.slot_count() >= 1) {
            if left.is_none() && right.is_none() {
                // the emptied root leaf: the tree is now empty
                debug_assert_eq!(leaf.id(), root_id);
                debug_assert_eq!(leaf.slot_count(), 0);
                self.pager.free_page(root_id)?;
                self.pager.set_root_page(NO_PAGE)?;
                self.pager.set_head_leaf(NO_PAGE)?;
                self.pager.set_tail_leaf(NO_PAGE)?;
                return Ok(my_res);
            }

            let left_few = left.map_or(true, |n| self.is_few(n));
            let right_few = right.map_or(true, |n| self.is_few(n));

            if left_few && right_few {
                // neither side can spare entries: merge under the shared
                // parent
                if same_node(left_parent, parent) {
                    let left = left.expect("left sibling exists when its parent is ours");
                    my_res.absorb(self.merge_leaves(left, leaf)?);
                } else {
                    let right = right.expect("right sibling exists when left is foreign");
                    my_res.absorb(self.merge_leaves(leaf, right)?);
                }
            } else if left_few && !right_few {
                if same_node(right_parent, parent) {
                    let right = right.expect("right sibling is plentiful");
                    let rp = right_parent.expect("right parent accompanies right sibling");
                    my_res.absorb(self.shift_left_leaf(leaf, right, rp, parent_slot)?);
                } else {
                    let left = left.expect("left sibling exists in mixed case");
                    my_res.absorb(self.merge_leaves(left, leaf)?);
                }
            } else if !left_few && right_few {
                if same_node(left_parent, parent) {
                    let left = left.expect("left sibling is plentiful");
                    let lp = left_parent.expect("left parent accompanies left sibling");
                    self.shift_right_leaf(left, leaf, lp, parent_slot - 1)?;
                } else {
                    let right = right.expect("right sibling exists in mixed case");
                    my_res.absorb(self.merge_leaves(leaf, right)?);
                }
            } else if same_node(left_parent, right_parent) {
                let left = left.expect("both siblings plentiful");
                let right = right.expect("both siblings plentiful");
                if left.slot_count() <= right.slot_count() {
                    let rp = right_parent.expect("shared parent");
                    my_res.absorb(self.shift_left_leaf(leaf, right, rp, parent_slot)?);
                } else {
                    let lp = left_parent.expect("shared parent");
                    self.shift_right_leaf(left, leaf, lp, parent_slot - 1)?;
                }
            } else if same_node(left_parent, parent) {
                let left = left.expect("left sibling under our parent");
                let lp = left_parent.expect("left parent is ours");
                self.shift_right_leaf(left, leaf, lp, parent_slot - 1)?;
            } else {
                let right = right.expect("right sibling under our parent");
                let rp = right_parent.expect("right parent is ours");
                my_res.absorb(self.shift_left_leaf(leaf, right, rp, parent_slot)?);
            }
        }

        Ok(my_res)
    }

    /// Applies a child's erase outcome to its inner parent: last-key
    /// propagation, merged-child removal, then this node's own underflow
    /// repair.
    #[allow(clippy::too_many_arguments)]
    fn finish_inner(
        &mut self,
        inner: &Node,
        slot: usize,
        result: EraseFlags,
        left: Option<&Node>,
        right: Option<&Node>,
        left_parent: Option<&Node>,
        right_parent: Option<&Node>,
        parent: Option<&Node>,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        let mut my_res = EraseFlags::default();
        let mut slot = slot;

        if let Some(last_key) = result.last_key {
            match parent {
                Some(parent) if parent_slot < parent.slot_count() => {
                    parent.set_key(parent_slot, &last_key);
                }
                _ => my_res.last_key = Some(last_key),
            }
        }

        if result.fix_merge {
            // one of the two merged children is empty; the survivor kept
            // everything. The empty one sits right of the survivor.
            if self.node(inner.child(slot))?.slot_count() != 0 {
                slot += 1;
            }
            let dead = inner.child(slot);
            debug_assert_eq!(self.node(dead)?.slot_count(), 0);
            self.pager.free_page(dead)?;

            let count = inner.slot_count();
            inner.move_keys_within(slot..count, slot - 1);
            inner.move_payload_within(slot + 1..count + 1, slot);
            inner.set_slot_count(count - 1);

            if inner.level() == 1 {
                // repair the separator over the surviving merged leaf
                slot -= 1;
                let child = self.node(inner.child(slot))?;
                if child.slot_count() > 0 && slot < inner.slot_count() {
                    inner.set_key(slot, child.key(child.slot_count() - 1));
                }
            }
        }

        let root_id = self.pager.root_page()?;
        if self.is_underflow(inner) && !(inner.id() == root_id && inner.slot_count() >= 1) {
            if left.is_none() && right.is_none() {
                // the root is down to a single child: promote it
                debug_assert_eq!(inner.id(), root_id);
                debug_assert_eq!(inner.slot_count(), 0);
                self.pager.set_root_page(inner.child(0))?;
                inner.set_slot_count(0);
                self.pager.free_page(inner.id())?;
                return Ok(EraseFlags::default());
            }

            let left_few = left.map_or(true, |n| self.is_few(n));
            let right_few = right.map_or(true, |n| self.is_few(n));

            if left_few && right_few {
                if same_node(left_parent, parent) {
                    let left = left.expect("left sibling exists when its parent is ours");
                    let lp = left_parent.expect("left parent accompanies left sibling");
                    my_res.absorb(self.merge_inner(left, inner, lp, parent_slot - 1)?);
                } else {
                    let right = right.expect("right sibling exists when left is foreign");
                    let rp = right_parent.expect("right parent accompanies right sibling");
                    my_res.absorb(self.merge_inner(inner, right, rp, parent_slot)?);
                }
            } else if left_few && !right_few {
                if same_node(right_parent, parent) {
                    let right = right.expect("right sibling is plentiful");
                    let rp = right_parent.expect("right parent accompanies right sibling");
                    self.shift_left_inner(inner, right, rp, parent_slot)?;
                } else {
                    let left = left.expect("left sibling exists in mixed case");
                    let lp = left_parent.expect("left parent accompanies left sibling");
                    my_res.absorb(self.merge_inner(left, inner, lp, parent_slot - 1)?);
                }
            } else if !left_few && right_few {
                if same_node(left_parent, parent) {
                    let left = left.expect("left sibling is plentiful");
                    let lp = left_parent.expect("left parent is ours");
                    self.shift_right_inner(left, inner, lp, parent_slot - 1)?;
                } else {
                    let right = right.expect("right sibling exists in mixed case");
                    let rp = right_parent.expect("right parent accompanies right sibling");
                    my_res.absorb(self.merge_inner(inner, right, rp, parent_slot)?);
                }
            } else if same_node(left_parent, right_parent) {
                let left = left.expect("both siblings plentiful");
                let right = right.expect("both siblings plentiful");
                if left.slot_count() <= right.slot_count() {
                    let rp = right_parent.expect("shared parent");
                    self.shift_left_inner(inner, right, rp, parent_slot)?;
                } else {
                    let lp = left_parent.expect("shared parent");
                    self.shift_right_inner(left, inner, lp, parent_slot - 1)?;
                }
            } else if same_node(left_parent, parent) {
                let left = left.expect("left sibling under our parent");
                let lp = left_parent.expect("left parent is ours");
                self.shift_right_inner(left, inner, lp, parent_slot - 1)?;
            } else {
                let right = right.expect("right sibling under our parent");
                let rp = right_parent.expect("right parent is ours");
                self.shift_left_inner(inner, right, rp, parent_slot)?;
            }
        }

        Ok(my_res)
    }

    /// Appends everything in `right` to `left` and stitches the leaf
    /// chain. The emptied right node is removed by the caller's parent.
    fn merge_leaves(&mut self, left: &Node, right: &Node) -> Result<EraseFlags> {
        let lcount = left.slot_count();
        let rcount = right.slot_count();

        left.copy_keys_from(right, 0..rcount, lcount);
        left.copy_payload_from(right, 0..rcount, lcount);
        left.set_slot_count(lcount + rcount);

        left.set_next_leaf(right.next_leaf());
        if left.next_leaf() != NO_PAGE {
            let next = self.node(left.next_leaf())?;
            next.set_prev_leaf(left.id());
        } else {
            self.pager.set_tail_leaf(left.id())?;
        }

        right.set_slot_count(0);
        Ok(EraseFlags::fix_merge())
    }

    /// Pulls the separating key down from the parent, then appends all of
    /// `right`'s keys and children to `left`.
    fn merge_inner(
        &mut self,
        left: &Node,
        right: &Node,
        parent: &Node,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        let lcount = left.slot_count();
        left.set_key(lcount, parent.key(parent_slot));
        let lcount = lcount + 1;

        let rcount = right.slot_count();
        left.copy_keys_from(right, 0..rcount, lcount);
        left.copy_payload_from(right, 0..rcount + 1, lcount);
        left.set_slot_count(lcount + rcount);

        right.set_slot_count(0);
        Ok(EraseFlags::fix_merge())
    }

    /// Balances two leaves by moving entries from the front of `right` to
    /// the back of `left`.
    fn shift_left_leaf(
        &mut self,
        left: &Node,
        right: &Node,
        parent: &Node,
        parent_slot: usize,
    ) -> Result<EraseFlags> {
        let shift = (right.slot_count() - left.slot_count()) / 2;

        let lcount = left.slot_count();
        left.copy_keys_from(right, 0..shift, lcount);
        left.copy_payload_from(right, 0..shift, lcount);
        left.set_slot_count(lcount + shift);

        let rcount = right.slot_count();
        right.move_keys_within(shift..rcount, 0);
        right.move_payload_within(shift..rcount, 0);
        right.set_slot_count(rcount - shift);

        if parent_slot < parent.slot_count() {
            parent.set_key(parent_slot, left.key(left.slot_count() - 1));
            Ok(EraseFlags::default())
        } else {
            // the separator to patch lives further up the tree
            Ok(EraseFlags {
                last_key: Some(left.key(left.slot_count() - 1).to_vec()),
                ..Default::default()
            })
        }
    }

    /// Balances two leaves by moving entries from the back of `left` to
    /// the front of `right`. The in-place shift overlaps and relies on
    /// memmove semantics.
    fn shift_right_leaf(
        &mut self,
        left: &Node,
        right: &Node,
        parent: &Node,
        parent_slot: usize,
    ) -> Result<()> {
        let shift = (left.slot_count() - right.slot_count()) / 2;

        let rcount = right.slot_count();
        right.move_keys_within(0..rcount, shift);
        right.move_payload_within(0..rcount, shift);
        right.set_slot_count(rcount + shift);

        let lcount = left.slot_count();
        right.copy_keys_from(left, lcount - shift..lcount, 0);
        right.copy_payload_from(left, lcount - shift..lcount, 0);
        left.set_slot_count(lcount - shift);

        parent.set_key(parent_slot, left.key(left.slot_count() - 1));
        Ok(())
    }

    /// Inner-node balance toward the left: the parent's separator rotates
    /// down to `left`, a replacement rotates up from `right`.
    fn shift_left_inner(
        &mut self,
        left: &Node,
        right: &Node,
        parent: &Node,
        parent_slot: usize,
    ) -> Result<()> {
        let shift = (right.slot_count() - left.slot_count()) / 2;

        let lcount = left.slot_count();
        left.set_key(lcount, parent.key(parent_slot));
        let lcount = lcount + 1;

        left.copy_keys_from(right, 0..shift - 1, lcount);
        left.copy_payload_from(right, 0..shift, lcount);
        left.set_slot_count(lcount + shift - 1);

        parent.set_key(parent_slot, right.key(shift - 1));

        let rcount = right.slot_count();
        right.move_keys_within(shift..rcount, 0);
        right.move_payload_within(shift..rcount + 1, 0);
        right.set_slot_count(rcount - shift);
        Ok(())
    }

    /// Inner-node balance toward the right; mirror of `shift_left_inner`,
    /// with the overlapping shift done in memmove fashion.
    fn shift_right_inner(
        &mut self,
        left: &Node,
        right: &Node,
        parent: &Node,
        parent_slot: usize,
    ) -> Result<()> {
        let shift = (left.slot_count() - right.slot_count()) / 2;

        let rcount = right.slot_count();
        right.move_keys_within(0..rcount, shift);
        right.move_payload_within(0..rcount + 1, shift);
        right.set_slot_count(rcount + shift);

        right.set_key(shift - 1, parent.key(parent_slot));

        let lcount = left.slot_count();
        right.copy_keys_from(left, lcount - shift + 1..lcount, 0);
        right.copy_payload_from(left, lcount - shift + 1..lcount + 1, 0);

        parent.set_key(parent_slot, left.key(lcount - shift));
        left.set_slot_count(lcount - shift);
        Ok(())
    }

    // ---- plumbing -----------------------------------------------------

    fn check_key(&self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() == self.key_schema.width(),
            "schema mismatch: key tuple is {} bytes, key schema width is {}",
            key.len(),
            self.key_schema.width()
        );
        Ok(())
    }

    /// Fetches a page the tree structure points at; a missing page here is
    /// corruption, not absence.
    fn node(&self, id: PageId) -> Result<Node> {
        let page = self
            .pager
            .get_page(id)?
            .ok_or_else(|| eyre!("corrupt page: tree references missing page {}", id))?;
        Ok(Node::new(page, self.layout))
    }

    /// Fetches a chain neighbour; a freed or out-of-range id means "no
    /// such sibling".
    fn sibling(&self, id: PageId) -> Result<Option<Node>> {
        Ok(self
            .pager
            .get_page(id)?
            .map(|page| Node::new(page, self.layout)))
    }

    fn allocate_leaf(&mut self) -> Result<Node> {
        let page = self.pager.allocate_page()?;
        let node = Node::new(page, self.layout);
        node.init(0);
        Ok(node)
    }

    fn allocate_inner(&mut self, level: i32) -> Result<Node> {
        let page = self.pager.allocate_page()?;
        let node = Node::new(page, self.layout);
        node.init(level);
        Ok(node)
    }

    fn is_full(&self, node: &Node) -> bool {
        node.slot_count() == self.layout.slot_capacity
    }

    fn is_few(&self, node: &Node) -> bool {
        node.slot_count() <= self.min_slots
    }

    fn is_underflow(&self, node: &Node) -> bool {
        node.slot_count() < self.min_slots
    }

    /// First slot whose key is >= `key` (0 on an empty node,
    /// `slot_count` when every key is smaller).
    fn find_lower(&self, node: &Node, key: &[u8]) -> usize {
        let mut lo = 0;
        let mut hi = node.slot_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_schema.compare(key, node.key(mid)) != Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    /// First slot whose key is > `key`.
    fn find_upper(&self, node: &Node, key: &[u8]) -> usize {
        let mut lo = 0;
        let mut hi = node.slot_count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_schema.compare(key, node.key(mid)) == Ordering::Less {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    fn descend_lower(&self, key: &[u8]) -> Result<Option<(Node, usize)>> {
        let root_id = self.pager.root_page()?;
        if root_id == NO_PAGE {
            return Ok(None);
        }

        let mut node = self.node(root_id)?;
        while !node.is_leaf() {
            let slot = self.find_lower(&node, key);
            node = self.node(node.child(slot))?;
        }
        let slot = self.find_lower(&node, key);
        Ok(Some((node, slot)))
    }

    // ---- verification -------------------------------------------------

    /// Full structural check: node occupancy and ordering, separator keys,
    /// leaf chain links, item accounting, free-set consistency. Intended
    /// for tests and for debugging workloads.
    pub fn verify(&self) -> Result<()> {
        let root_id = self.pager.root_page()?;
        if root_id == NO_PAGE {
            ensure!(
                self.pager.head_leaf()? == NO_PAGE && self.pager.tail_leaf()? == NO_PAGE,
                "empty tree has a dangling leaf chain"
            );
            ensure!(
                self.pager.item_count()? == 0,
                "empty tree reports {} items",
                self.pager.item_count()?
            );
            ensure!(
                self.pager.used_pages()? == 0,
                "empty tree holds {} live pages",
                self.pager.used_pages()?
            );
            return Ok(());
        }

        let root = self.node(root_id)?;
        let mut reachable = Vec::new();
        let mut leaves = Vec::new();
        let mut items = 0u64;
        self.verify_node(&root, true, &mut reachable, &mut leaves, &mut items)?;

        ensure!(
            items == self.pager.item_count()?,
            "tree holds {} entries but the header reports {}",
            items,
            self.pager.item_count()?
        );

        // the leaf chain must visit exactly the leaves, in tree order
        let mut chain = Vec::new();
        let mut prev = NO_PAGE;
        let mut id = self.pager.head_leaf()?;
        let mut prev_key: Option<Vec<u8>> = None;
        while id != NO_PAGE {
            let leaf = self.node(id)?;
            ensure!(
                leaf.prev_leaf() == prev,
                "leaf {} has prev {} but {} precedes it",
                id,
                leaf.prev_leaf(),
                prev
            );
            for slot in 0..leaf.slot_count() {
                if let Some(prev_key) = &prev_key {
                    ensure!(
                        self.key_schema.compare(prev_key, leaf.key(slot)) != Ordering::Greater,
                        "keys out of order at leaf {} slot {}",
                        id,
                        slot
                    );
                }
                prev_key = Some(leaf.key(slot).to_vec());
            }
            chain.push(id);
            prev = id;
            id = leaf.next_leaf();
        }
        ensure!(
            prev == self.pager.tail_leaf()?,
            "leaf chain ends at {} but the header says tail is {}",
            prev,
            self.pager.tail_leaf()?
        );
        ensure!(
            chain == leaves,
            "leaf chain {:?} disagrees with tree order {:?}",
            chain,
            leaves
        );

        for id in &reachable {
            ensure!(
                !self.pager.free_pages().contains(id),
                "page {} is both reachable and free",
                id
            );
        }
        ensure!(
            reachable.len() == self.pager.used_pages()? as usize,
            "{} reachable pages but {} marked used",
            reachable.len(),
            self.pager.used_pages()?
        );

        Ok(())
    }

    /// Checks one subtree and returns its maximum key.
    fn verify_node(
        &self,
        node: &Node,
        is_root: bool,
        reachable: &mut Vec<PageId>,
        leaves: &mut Vec<PageId>,
        items: &mut u64,
    ) -> Result<Vec<u8>> {
        reachable.push(node.id());
        let count = node.slot_count();

        ensure!(
            count <= self.layout.slot_capacity,
            "node {} overflows: {} slots of {}",
            node.id(),
            count,
            self.layout.slot_capacity
        );
        if is_root {
            ensure!(count >= 1, "non-empty root {} has no slots", node.id());
        } else {
            ensure!(
                count >= self.min_slots,
                "node {} underflows: {} slots, minimum {}",
                node.id(),
                count,
                self.min_slots
            );
        }
        for slot in 1..count {
            ensure!(
                self.key_schema.compare(node.key(slot - 1), node.key(slot)) != Ordering::Greater,
                "node {} keys out of order at slot {}",
                node.id(),
                slot
            );
        }

        if node.is_leaf() {
            leaves.push(node.id());
            *items += count as u64;
            return Ok(node.key(count - 1).to_vec());
        }

        let mut max_key = Vec::new();
        for slot in 0..=count {
            let child = self.node(node.child(slot))?;
            ensure!(
                child.level() == node.level() - 1,
                "child {} of node {} is at level {}, expected {}",
                child.id(),
                node.id(),
                child.level(),
                node.level() - 1
            );
            let child_max = self.verify_node(&child, false, reachable, leaves, items)?;
            if slot < count {
                ensure!(
                    self.key_schema.compare(&child_max, node.key(slot)) == Ordering::Equal,
                    "separator {} of node {} is not the child's maximum",
                    slot,
                    node.id()
                );
            } else {
                max_key = child_max;
            }
        }
        Ok(max_key)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("open", &self.is_open())
            .field("slot_capacity", &self.layout.slot_capacity)
            .field("key_size", &self.layout.key_size)
            .field("data_size", &self.layout.data_size)
            .finish()
    }
}

/// Forward iterator over `(key, data)` byte pairs.
pub struct TreeIter<'a> {
    tree: &'a Tree,
    cursor: Option<Cursor>,
    finished: bool,
}

impl Iterator for TreeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.cursor.is_none() {
            match self.tree.begin() {
                Ok(cursor) => self.cursor = Some(cursor),
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }

        let cursor = self.cursor.as_mut().expect("cursor was just seeded");
        if cursor.is_end() {
            self.finished = true;
            return None;
        }

        let key = cursor.key().expect("cursor is not at end").to_vec();
        let data = cursor.data().expect("cursor is not at end").to_vec();

        match self.tree.advance(cursor) {
            Ok(()) => Some(Ok((key, data))),
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
