//! # Field Type System
//!
//! The canonical `FieldType` enum used across schema definitions, tuple
//! comparison and the query surface. A field is one of five fixed-width
//! primitives or an inline fixed-capacity string.

mod field_type;

pub use field_type::{FieldType, STRING_PREFIX_SIZE};
