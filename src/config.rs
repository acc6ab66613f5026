//! # Geometry Constants
//!
//! Centralizes the on-disk geometry of a tree: page prefix size, header
//! record size, schema limits. Constants that depend on each other are
//! co-located and pinned with compile-time assertions so a change to one
//! cannot silently invalidate another.
//!
//! ```text
//! PAGE_PREFIX_SIZE (32 bytes)
//!       │
//!       └─> slot region starts at offset 32 on every page
//!
//! MAX_SCHEMA_FIELDS (64)
//!       │
//!       └─> fixed field table size inside the header record
//!
//! HEADER_SIZE (640 bytes)
//!       │
//!       └─> exact size of the header file record (two schema tables
//!           dominate: 2 x 260 bytes)
//! ```

/// Fixed per-page prefix: liveness flag, id, level, capacity, count and the
/// leaf chain links. Everything after it is the two slot arrays.
pub const PAGE_PREFIX_SIZE: usize = 32;

/// Default page size for trees created without an explicit override.
pub const DEFAULT_PAGE_BYTES: usize = 4096;

/// An inner node stores child page ids in its payload slots; payload entries
/// are therefore at least this wide.
pub const CHILD_ID_SIZE: usize = 4;

/// Upper bound on fields per schema, fixed by the header record layout.
pub const MAX_SCHEMA_FIELDS: usize = 64;

/// Exact byte size of the header file record.
pub const HEADER_SIZE: usize = 640;

/// Sentinel page id: "no page" (empty root, chain ends).
pub const NO_PAGE: i32 = -1;
