//! # Page Prefix and Slot Layout
//!
//! Every page is `page_bytes` long and starts with a fixed 32-byte prefix,
//! followed by two parallel slot arrays:
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  ----------------------------------------
//! 0       1     is_live        valid / recycled marker
//! 1       3     (reserved)
//! 4       4     id             this page's id (i32 LE)
//! 8       4     level          0 = leaf, 1+ = inner
//! 12      4     slot_capacity  slots per page, fixed at tree creation
//! 16      4     slot_count     slots in use
//! 20      4     prev_leaf      leaf chain backward link (−1 at head)
//! 24      4     next_leaf      leaf chain forward link (−1 at tail)
//! 28      4     (reserved)
//! 32      ...   keys[]         slot_capacity x key_size bytes
//! ...     ...   payload[]      slot_capacity x max(data_size, 4) bytes
//! ```
//!
//! On a leaf the payload entries are data tuples; on an inner node they
//! are little-endian child page ids, with the extra `slot_count`-th child
//! stored at payload index `slot_count`.

use eyre::{ensure, Result};
use zerocopy::little_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{CHILD_ID_SIZE, PAGE_PREFIX_SIZE};
use crate::le_accessors;

use super::PageId;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PagePrefix {
    is_live: u8,
    reserved0: [u8; 3],
    id: I32,
    level: I32,
    slot_capacity: I32,
    slot_count: I32,
    prev_leaf: I32,
    next_leaf: I32,
    reserved1: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<PagePrefix>() == PAGE_PREFIX_SIZE);

impl PagePrefix {
    le_accessors! {
        id: i32,
        level: i32,
        slot_capacity: i32,
        slot_count: i32,
        prev_leaf: i32,
        next_leaf: i32,
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_PREFIX_SIZE,
            "buffer too small for PagePrefix: {} < {}",
            data.len(),
            PAGE_PREFIX_SIZE
        );
        Self::ref_from_bytes(&data[..PAGE_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PagePrefix: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_PREFIX_SIZE,
            "buffer too small for PagePrefix: {} < {}",
            data.len(),
            PAGE_PREFIX_SIZE
        );
        Self::mut_from_bytes(&mut data[..PAGE_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PagePrefix: {:?}", e))
    }

    pub fn is_live(&self) -> bool {
        self.is_live != 0
    }

    pub fn set_live(&mut self, live: bool) {
        self.is_live = live as u8;
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }
}

/// Byte geometry of the two slot arrays, derived once per open tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_bytes: usize,
    pub key_size: usize,
    pub data_size: usize,
    /// `max(data_size, CHILD_ID_SIZE)`: data tuples on leaves, child ids
    /// on inner nodes, one stride for both.
    pub payload_size: usize,
    pub slot_capacity: usize,
}

impl PageLayout {
    pub fn new(page_bytes: usize, key_size: usize, data_size: usize) -> Result<Self> {
        let slot_capacity = slot_capacity_for(page_bytes, key_size, data_size);
        ensure!(
            slot_capacity >= 2,
            "page size {} holds only {} slots for key/data widths {}/{}; at least 2 required",
            page_bytes,
            slot_capacity,
            key_size,
            data_size
        );

        Ok(Self {
            page_bytes,
            key_size,
            data_size,
            payload_size: data_size.max(CHILD_ID_SIZE),
            slot_capacity,
        })
    }

    pub fn key_offset(&self, slot: usize) -> usize {
        debug_assert!(slot < self.slot_capacity);
        PAGE_PREFIX_SIZE + slot * self.key_size
    }

    pub fn payload_offset(&self, slot: usize) -> usize {
        // inner nodes store their extra child at index slot_capacity's
        // last in-bounds slot, so payload indexes run to capacity
        debug_assert!(slot < self.slot_capacity + 1);
        PAGE_PREFIX_SIZE + self.slot_capacity * self.key_size + slot * self.payload_size
    }
}

/// Slots per page for the given geometry.
pub fn slot_capacity_for(page_bytes: usize, key_size: usize, data_size: usize) -> usize {
    let payload = data_size.max(CHILD_ID_SIZE);
    page_bytes.saturating_sub(PAGE_PREFIX_SIZE) / (key_size + payload)
}

/// Structural check applied to live pages when a tree is opened.
pub fn validate_page(data: &[u8], layout: &PageLayout, expected_id: PageId) -> Result<()> {
    ensure!(
        data.len() == layout.page_bytes,
        "corrupt page {}: size {} != {}",
        expected_id,
        data.len(),
        layout.page_bytes
    );

    let prefix = PagePrefix::from_bytes(data)?;

    ensure!(
        prefix.id() == expected_id,
        "corrupt page {}: stored id is {}",
        expected_id,
        prefix.id()
    );
    ensure!(
        prefix.slot_capacity() as usize == layout.slot_capacity,
        "corrupt page {}: slot capacity {} != {}",
        expected_id,
        prefix.slot_capacity(),
        layout.slot_capacity
    );
    ensure!(
        prefix.slot_count() >= 0 && prefix.slot_count() as usize <= layout.slot_capacity,
        "corrupt page {}: slot count {} exceeds capacity {}",
        expected_id,
        prefix.slot_count(),
        layout.slot_capacity
    );
    ensure!(
        prefix.level() >= 0,
        "corrupt page {}: negative level {}",
        expected_id,
        prefix.level()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_size_is_32_bytes() {
        assert_eq!(std::mem::size_of::<PagePrefix>(), 32);
    }

    #[test]
    fn prefix_roundtrip_through_bytes() {
        let mut data = [0u8; 64];
        {
            let prefix = PagePrefix::from_bytes_mut(&mut data).unwrap();
            prefix.set_live(true);
            prefix.set_id(7);
            prefix.set_level(1);
            prefix.set_slot_capacity(4);
            prefix.set_slot_count(3);
            prefix.set_prev_leaf(-1);
            prefix.set_next_leaf(9);
        }

        let prefix = PagePrefix::from_bytes(&data).unwrap();
        assert!(prefix.is_live());
        assert!(!prefix.is_leaf());
        assert_eq!(prefix.id(), 7);
        assert_eq!(prefix.level(), 1);
        assert_eq!(prefix.slot_capacity(), 4);
        assert_eq!(prefix.slot_count(), 3);
        assert_eq!(prefix.prev_leaf(), -1);
        assert_eq!(prefix.next_leaf(), 9);
    }

    #[test]
    fn capacity_formula() {
        // the smallest usable fixture: 64-byte pages, INT/INT give 4 slots
        assert_eq!(slot_capacity_for(64, 4, 4), 4);
        // child ids dominate narrow data tuples
        assert_eq!(slot_capacity_for(64, 4, 1), 4);
        assert_eq!(slot_capacity_for(4096, 4, 4), 508);
    }

    #[test]
    fn layout_rejects_degenerate_capacity() {
        assert!(PageLayout::new(40, 4, 4).is_err());
        assert!(PageLayout::new(64, 4, 4).is_ok());
    }

    #[test]
    fn layout_offsets() {
        let layout = PageLayout::new(64, 4, 4).unwrap();
        assert_eq!(layout.slot_capacity, 4);
        assert_eq!(layout.key_offset(0), 32);
        assert_eq!(layout.key_offset(3), 44);
        assert_eq!(layout.payload_offset(0), 48);
        assert_eq!(layout.payload_offset(3), 60);
    }

    #[test]
    fn validate_catches_bad_counts() {
        let layout = PageLayout::new(64, 4, 4).unwrap();
        let mut data = [0u8; 64];
        {
            let prefix = PagePrefix::from_bytes_mut(&mut data).unwrap();
            prefix.set_live(true);
            prefix.set_id(0);
            prefix.set_slot_capacity(4);
            prefix.set_slot_count(3);
        }
        assert!(validate_page(&data, &layout, 0).is_ok());

        {
            let prefix = PagePrefix::from_bytes_mut(&mut data).unwrap();
            prefix.set_slot_count(5);
        }
        let err = validate_page(&data, &layout, 0).unwrap_err();
        assert!(err.to_string().contains("corrupt page"));
    }
}
