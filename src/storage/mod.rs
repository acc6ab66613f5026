//! # Storage Layer
//!
//! Memory-mapped page storage for the tree engine. The layout is two
//! regular files per tree:
//!
//! ```text
//! <name>          data file, n_pages x page_bytes, page n at byte
//!                 offset n * page_bytes
//! <name>_header   one fixed TreeHeader record: schemas, geometry,
//!                 root/head/tail ids, free-page accounting
//! ```
//!
//! ## Mapping model
//!
//! Each resident page has exactly one OS mapping, created on first access
//! and dropped when the last [`PageHandle`] clone goes away. Handles are
//! reference-counted; the manager's handle table holds weak references
//! only, so residency is driven purely by the callers that still hold a
//! page. This is deliberately different from a pinned buffer pool: the OS
//! page cache is the buffer pool, the handle table only deduplicates
//! mappings.
//!
//! ## Safety model
//!
//! The engine is single-writer by contract (no locking anywhere). A
//! handle hands out `&mut` page bytes from a shared reference under that
//! contract; see the SAFETY notes in [`pager`].
//!
//! ## Module organization
//!
//! - `mmap`: one mapped window of a file, alignment-correct for any page
//!   size
//! - `header`: the on-disk header record and its file wrapper
//! - `page`: per-page prefix struct and slot-region layout
//! - `pager`: page manager (allocation, free set, handle cache)

mod header;
mod mmap;
mod page;
mod pager;

pub use header::{HeaderFile, TreeHeader, CURRENT_VERSION, TREE_MAGIC};
pub use mmap::{extend_file, MappedRegion};
pub use page::{slot_capacity_for, validate_page, PageLayout, PagePrefix};
pub use pager::{PageHandle, PageManager};

pub use crate::config::{DEFAULT_PAGE_BYTES, NO_PAGE, PAGE_PREFIX_SIZE};

/// Page id within a tree's data file. Non-negative for real pages; the
/// format uses [`NO_PAGE`] (−1) as "no such page" in the header and in the
/// leaf chain links.
pub type PageId = i32;
