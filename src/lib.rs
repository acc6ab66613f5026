//! # tupledb: Embedded Ordered Tuple Store
//!
//! tupledb is an embedded, single-writer, persistent ordered key–value
//! store. Keys and values are fixed-width tuples described by a schema
//! (primitives plus inline fixed-capacity strings); storage is a B+ tree
//! of fixed-size pages mapped straight out of a regular file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Query Facade (CREATE/INSERT/GET)   │
//! ├─────────────────────────────────────┤
//! │        B+ Tree Engine (Tree)        │
//! ├─────────────────────────────────────┤
//! │   Schema & Tuple Layer (records)    │
//! ├─────────────────────────────────────┤
//! │  Page Manager & Handle Cache        │
//! ├─────────────────────────────────────┤
//! │  Memory-Mapped Page File + Header   │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File layout
//!
//! Each tree is a pair of regular files:
//!
//! ```text
//! <name>          pages, page n at byte offset n * page_bytes
//! <name>_header   one fixed header record: schemas, geometry, root id,
//!                 leaf chain endpoints, page accounting
//! ```
//!
//! Pages are mapped individually and on demand through the OS page cache;
//! page handles are reference-counted, and a page's mapping is dropped
//! when the last handle goes away. Durability is what the OS mapping
//! provides (plus explicit [`Tree::sync`]); there is no journal.
//!
//! ## Quick start
//!
//! ```ignore
//! use tupledb::{QueryEngine, Schema, Tree};
//!
//! // through the query facade
//! let engine = QueryEngine::new("./data");
//! engine.execute("CREATE users 'INT' 'STRING<16> BOOL'")?;
//! engine.execute("INSERT users '7' 'alice 1'")?;
//! let row = engine.execute("GET users '7'")?;
//!
//! // or directly against the engine
//! let mut tree = Tree::open("./data/users")?;
//! let key = 7i32.to_le_bytes();
//! assert!(tree.exists(&key)?);
//! ```
//!
//! ## Limits, by design
//!
//! Single writer, no locking: concurrent use of one file pair is
//! undefined. No transactions, no secondary indexes, no variable-length
//! records beyond the inline capacity-bounded string. Duplicate keys are
//! allowed.
//!
//! ## Module overview
//!
//! - [`types`]: field type tags and widths
//! - [`records`]: schemas, tuple comparison, literal parsing
//! - [`storage`]: mapped regions, header file, page manager
//! - [`btree`]: node views, cursors, the tree engine
//! - [`query`]: tokenizer and command dispatch

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod query;
pub mod records;
pub mod storage;
pub mod types;

pub use btree::{Cursor, Tree};
pub use query::{QueryEngine, QueryOutput};
pub use records::{Schema, Tuple, TupleMut};
pub use types::FieldType;
