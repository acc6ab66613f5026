//! # Schema and Tuple Layer
//!
//! A tuple is an opaque byte region interpreted through a [`Schema`]: an
//! ordered list of typed, fixed-width fields. The schema pre-computes field
//! offsets so comparison and field assignment are O(1) per field with no
//! allocation.
//!
//! Two schemas are fixed per tree (key and data). The engine compares raw
//! key regions through [`Schema::compare`]; the public [`Tuple`] wrapper
//! adds the schema-identity check the engine's internal paths do not need.

mod schema;
mod tuple;

pub use schema::Schema;
pub use tuple::{Tuple, TupleMut};
