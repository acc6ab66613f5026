//! # Schema Definition
//!
//! A `Schema` is an ordered sequence of typed fields with pre-computed byte
//! offsets. The total width is the sum of field widths and equals the exact
//! length of every tuple carrying this schema.
//!
//! Schemas are value types: equality is field-by-field and is what the
//! public tuple API uses to reject cross-schema operations.

use std::cmp::Ordering;

use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::config::MAX_SCHEMA_FIELDS;
use crate::types::FieldType;

use super::tuple;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: SmallVec<[FieldType; 8]>,
    offsets: SmallVec<[usize; 8]>,
    width: usize,
}

impl Schema {
    pub fn new<I>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = FieldType>,
    {
        let fields: SmallVec<[FieldType; 8]> = fields.into_iter().collect();

        ensure!(!fields.is_empty(), "schema must have at least one field");
        ensure!(
            fields.len() <= MAX_SCHEMA_FIELDS,
            "schema has {} fields, the format allows at most {}",
            fields.len(),
            MAX_SCHEMA_FIELDS
        );

        let mut offsets = SmallVec::with_capacity(fields.len());
        let mut offset = 0;
        for field in &fields {
            offsets.push(offset);
            offset += field.width();
        }

        Ok(Self {
            fields,
            offsets,
            width: offset,
        })
    }

    /// Parses a whitespace-separated list of type literals, e.g.
    /// `"INT STRING<8>"`.
    pub fn parse(text: &str) -> Result<Self> {
        let fields = text
            .split_whitespace()
            .map(FieldType::parse)
            .collect::<Result<SmallVec<[FieldType; 8]>>>()?;
        Self::new(fields)
    }

    /// Total tuple width in bytes.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> FieldType {
        self.fields[idx]
    }

    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    /// Byte offset of field `idx` within a tuple.
    pub fn offset(&self, idx: usize) -> usize {
        self.offsets[idx]
    }

    /// Lexicographic field-by-field comparison of two raw tuple regions that
    /// are known to carry this schema. This is the engine's hot path; the
    /// schema-identity check lives on [`super::Tuple::compare`].
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.width);
        debug_assert_eq!(b.len(), self.width);

        for (field, &offset) in self.fields.iter().zip(&self.offsets) {
            let end = offset + field.width();
            let ord = tuple::compare_field(field, &a[offset..end], &b[offset..end]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Parses a textual literal into field `idx` of `buf`.
    pub fn set_field(&self, buf: &mut [u8], idx: usize, literal: &str) -> Result<()> {
        ensure!(
            buf.len() == self.width,
            "schema mismatch: tuple is {} bytes, schema width is {}",
            buf.len(),
            self.width
        );
        ensure!(
            idx < self.fields.len(),
            "field index {} out of range (schema has {} fields)",
            idx,
            self.fields.len()
        );

        let field = self.fields[idx];
        let offset = self.offsets[idx];
        tuple::write_literal(field, &mut buf[offset..offset + field.width()], literal)
    }

    /// Renders all fields of a tuple as space-separated text.
    pub fn format_tuple(&self, buf: &[u8]) -> String {
        let mut out = String::new();
        for (idx, (field, &offset)) in self.fields.iter().zip(&self.offsets).enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            tuple::format_field(field, &buf[offset..offset + field.width()], &mut out);
        }
        out
    }
}
