//! # Tree Header File
//!
//! `<name>_header` holds exactly one `TreeHeader` record describing the
//! whole tree: magic and format version, page geometry, root and leaf
//! chain endpoints, page accounting, the persistent item count, and both
//! schemas as fixed 64-entry field tables.
//!
//! The record is 640 bytes, pinned by a compile-time assert. All
//! multi-byte fields are little-endian zerocopy wrappers so the struct can
//! be read and written in place through the file mapping.
//!
//! The schemas are immutable after creation; every open re-derives
//! `key_size` / `data_size` / `slot_capacity` purely from the header and
//! cross-checks them against the stored derived values.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::{I32, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{HEADER_SIZE, MAX_SCHEMA_FIELDS, NO_PAGE};
use crate::le_accessors;
use crate::records::Schema;
use crate::types::FieldType;

use super::mmap::{extend_file, MappedRegion};
use super::page::slot_capacity_for;

pub const TREE_MAGIC: &[u8; 8] = b"TplTree\0";
pub const CURRENT_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FieldRepr {
    tag: u8,
    reserved: u8,
    /// Declared capacity for STRING fields, zero otherwise.
    aux: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct SchemaRepr {
    field_count: U16,
    reserved: [u8; 2],
    fields: [FieldRepr; MAX_SCHEMA_FIELDS],
}

const _: () = assert!(std::mem::size_of::<SchemaRepr>() == 260);

impl SchemaRepr {
    fn encode(schema: &Schema) -> Self {
        let mut fields = [FieldRepr {
            tag: 0,
            reserved: 0,
            aux: U16::new(0),
        }; MAX_SCHEMA_FIELDS];

        for (idx, field) in schema.fields().iter().enumerate() {
            let aux = match field {
                FieldType::Str(cap) => *cap,
                _ => 0,
            };
            fields[idx] = FieldRepr {
                tag: field.tag(),
                reserved: 0,
                aux: U16::new(aux),
            };
        }

        Self {
            field_count: U16::new(schema.field_count() as u16),
            reserved: [0; 2],
            fields,
        }
    }

    fn decode(&self) -> Result<Schema> {
        let count = self.field_count.get() as usize;
        ensure!(
            count >= 1 && count <= MAX_SCHEMA_FIELDS,
            "corrupt header: schema field count {}",
            count
        );

        let fields = self.fields[..count]
            .iter()
            .map(|f| FieldType::from_tag(f.tag, f.aux.get()))
            .collect::<Result<Vec<_>>>()
            .wrap_err("corrupt header: bad schema field")?;
        Schema::new(fields)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TreeHeader {
    magic: [u8; 8],
    version: U32,
    init: u8,
    reserved0: [u8; 3],
    page_bytes: U32,
    n_pages: U32,
    used_pages: U32,
    root_page: I32,
    head_leaf: I32,
    tail_leaf: I32,
    file_size: U64,
    item_count: U64,
    key_size: U32,
    data_size: U32,
    slot_capacity: U32,
    key_schema: SchemaRepr,
    data_schema: SchemaRepr,
    reserved1: [u8; 52],
}

const _: () = assert!(std::mem::size_of::<TreeHeader>() == HEADER_SIZE);

impl TreeHeader {
    le_accessors! {
        page_bytes: u32,
        n_pages: u32,
        used_pages: u32,
        root_page: i32,
        head_leaf: i32,
        tail_leaf: i32,
        file_size: u64,
        item_count: u64,
    }

    pub fn new(page_bytes: usize, key_schema: &Schema, data_schema: &Schema) -> Result<Self> {
        let slot_capacity =
            slot_capacity_for(page_bytes, key_schema.width(), data_schema.width());
        ensure!(
            slot_capacity >= 2,
            "page size {} holds only {} slots for key/data widths {}/{}; at least 2 required",
            page_bytes,
            slot_capacity,
            key_schema.width(),
            data_schema.width()
        );

        Ok(Self {
            magic: *TREE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            init: 1,
            reserved0: [0; 3],
            page_bytes: U32::new(page_bytes as u32),
            n_pages: U32::new(0),
            used_pages: U32::new(0),
            root_page: I32::new(NO_PAGE),
            head_leaf: I32::new(NO_PAGE),
            tail_leaf: I32::new(NO_PAGE),
            file_size: U64::new(0),
            item_count: U64::new(0),
            key_size: U32::new(key_schema.width() as u32),
            data_size: U32::new(data_schema.width() as u32),
            slot_capacity: U32::new(slot_capacity as u32),
            key_schema: SchemaRepr::encode(key_schema),
            data_schema: SchemaRepr::encode(data_schema),
            reserved1: [0; 52],
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            "buffer too small for TreeHeader: {} < {}",
            bytes.len(),
            HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse TreeHeader: {:?}", e))?;
        header.validate()?;
        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            "buffer too small for TreeHeader: {} < {}",
            bytes.len(),
            HEADER_SIZE
        );

        let header = Self::mut_from_bytes(&mut bytes[..HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse TreeHeader: {:?}", e))?;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            &self.magic == TREE_MAGIC,
            "invalid magic bytes in header file"
        );
        ensure!(
            self.version.get() == CURRENT_VERSION,
            "unsupported header version: {} (expected {})",
            self.version.get(),
            CURRENT_VERSION
        );
        ensure!(self.init != 0, "header file was never initialized");
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn key_size(&self) -> usize {
        self.key_size.get() as usize
    }

    pub fn data_size(&self) -> usize {
        self.data_size.get() as usize
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity.get() as usize
    }

    pub fn decode_key_schema(&self) -> Result<Schema> {
        let schema = self.key_schema.decode()?;
        ensure!(
            schema.width() == self.key_size(),
            "corrupt header: key schema width {} != stored key size {}",
            schema.width(),
            self.key_size()
        );
        Ok(schema)
    }

    pub fn decode_data_schema(&self) -> Result<Schema> {
        let schema = self.data_schema.decode()?;
        ensure!(
            schema.width() == self.data_size(),
            "corrupt header: data schema width {} != stored data size {}",
            schema.width(),
            self.data_size()
        );
        Ok(schema)
    }
}

/// The mapped header file.
#[derive(Debug)]
pub struct HeaderFile {
    region: MappedRegion,
}

impl HeaderFile {
    /// Creates (or truncates) the header file and writes `header` into it.
    pub fn create(path: &Path, header: &TreeHeader) -> Result<Self> {
        {
            let _ = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .wrap_err_with(|| {
                    format!("failed to create header file '{}'", path.display())
                })?;
        }
        extend_file(path, HEADER_SIZE as u64)?;

        let file = open_rw(path)?;
        let mut region = MappedRegion::map(&file, 0, HEADER_SIZE)?;
        region.bytes_mut().copy_from_slice(header.as_bytes());
        region.flush()?;

        Ok(Self { region })
    }

    /// Maps an existing header file and validates the record.
    pub fn open(path: &Path) -> Result<Self> {
        ensure!(
            path.exists(),
            "tree is not open: header file '{}' does not exist",
            path.display()
        );

        let file = open_rw(path)?;
        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();
        ensure!(
            len >= HEADER_SIZE as u64,
            "header file '{}' is truncated: {} < {} bytes",
            path.display(),
            len,
            HEADER_SIZE
        );

        let region = MappedRegion::map(&file, 0, HEADER_SIZE)?;
        TreeHeader::from_bytes(region.bytes())
            .wrap_err_with(|| format!("failed to open header '{}'", path.display()))?;

        Ok(Self { region })
    }

    pub fn header(&self) -> &TreeHeader {
        // INVARIANT: the region was validated at create/open time
        TreeHeader::from_bytes(self.region.bytes()).expect("header mapping went bad")
    }

    pub fn header_mut(&mut self) -> &mut TreeHeader {
        // INVARIANT: the region was validated at create/open time
        TreeHeader::from_bytes_mut(self.region.bytes_mut()).expect("header mapping went bad")
    }

    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open '{}'", path.display()))
}
