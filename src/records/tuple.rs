//! # Tuple Views and Field Codec
//!
//! [`Tuple`] and [`TupleMut`] wrap a raw byte region together with the
//! schema that interprets it. The free functions at the bottom are the
//! per-field codec: typed comparison, literal parsing and text rendering
//! over little-endian field encodings.
//!
//! Field encodings:
//! - SHORT/INT/INT64: two's-complement little-endian
//! - DOUBLE: IEEE 754 bits little-endian, compared with total ordering
//! - BOOL: one byte, 0 or 1
//! - STRING<N>: u16 little-endian stored length, then N capacity bytes;
//!   comparison is bytewise over the stored prefix, ties broken by length

use std::cmp::Ordering;

use eyre::{bail, ensure, Result, WrapErr};

use crate::types::{FieldType, STRING_PREFIX_SIZE};

use super::Schema;

/// Read-only tuple view.
#[derive(Debug, Clone, Copy)]
pub struct Tuple<'a> {
    schema: &'a Schema,
    bytes: &'a [u8],
}

impl<'a> Tuple<'a> {
    pub fn new(schema: &'a Schema, bytes: &'a [u8]) -> Result<Self> {
        ensure!(
            bytes.len() == schema.width(),
            "schema mismatch: tuple is {} bytes, schema width is {}",
            bytes.len(),
            schema.width()
        );
        Ok(Self { schema, bytes })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Total typed ordering against another tuple of the same schema.
    /// Comparing across schemas is a deterministic error.
    pub fn compare(&self, other: &Tuple<'_>) -> Result<Ordering> {
        ensure!(
            self.schema == other.schema,
            "schema mismatch: cannot compare tuples of different schemas"
        );
        Ok(self.schema.compare(self.bytes, other.bytes))
    }

    /// Renders all fields as space-separated text.
    pub fn format(&self) -> String {
        self.schema.format_tuple(self.bytes)
    }
}

/// Mutable tuple view; the only writer of textual literals into a tuple.
#[derive(Debug)]
pub struct TupleMut<'a> {
    schema: &'a Schema,
    bytes: &'a mut [u8],
}

impl<'a> TupleMut<'a> {
    pub fn new(schema: &'a Schema, bytes: &'a mut [u8]) -> Result<Self> {
        ensure!(
            bytes.len() == schema.width(),
            "schema mismatch: tuple is {} bytes, schema width is {}",
            bytes.len(),
            schema.width()
        );
        Ok(Self { schema, bytes })
    }

    /// Parses a textual literal into field `idx`.
    pub fn set_field(&mut self, idx: usize, literal: &str) -> Result<()> {
        self.schema.set_field(self.bytes, idx, literal)
    }

    pub fn as_tuple(&'a self) -> Tuple<'a> {
        Tuple {
            schema: self.schema,
            bytes: self.bytes,
        }
    }
}

/// Typed comparison of one field's stored bytes. `a` and `b` are exactly
/// `field.width()` bytes each.
pub(crate) fn compare_field(field: &FieldType, a: &[u8], b: &[u8]) -> Ordering {
    match field {
        FieldType::Short => {
            let lhs = i16::from_le_bytes([a[0], a[1]]);
            let rhs = i16::from_le_bytes([b[0], b[1]]);
            lhs.cmp(&rhs)
        }
        FieldType::Int => {
            let lhs = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
            let rhs = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            lhs.cmp(&rhs)
        }
        FieldType::Int64 => {
            let lhs = i64::from_le_bytes(a.try_into().unwrap());
            let rhs = i64::from_le_bytes(b.try_into().unwrap());
            lhs.cmp(&rhs)
        }
        FieldType::Double => {
            let lhs = f64::from_le_bytes(a.try_into().unwrap());
            let rhs = f64::from_le_bytes(b.try_into().unwrap());
            lhs.total_cmp(&rhs)
        }
        FieldType::Bool => a[0].cmp(&b[0]),
        FieldType::Str(cap) => {
            let lhs = stored_str_bytes(a, *cap);
            let rhs = stored_str_bytes(b, *cap);
            let shared = lhs.len().min(rhs.len());
            match lhs[..shared].cmp(&rhs[..shared]) {
                Ordering::Equal => lhs.len().cmp(&rhs.len()),
                ord => ord,
            }
        }
    }
}

/// Parses a textual literal into one field's byte region.
pub(crate) fn write_literal(field: FieldType, dst: &mut [u8], literal: &str) -> Result<()> {
    debug_assert_eq!(dst.len(), field.width());

    match field {
        FieldType::Short => {
            let val: i16 = literal
                .parse()
                .wrap_err_with(|| format!("invalid SHORT literal '{}'", literal))?;
            dst.copy_from_slice(&val.to_le_bytes());
        }
        FieldType::Int => {
            let val: i32 = literal
                .parse()
                .wrap_err_with(|| format!("invalid INT literal '{}'", literal))?;
            dst.copy_from_slice(&val.to_le_bytes());
        }
        FieldType::Int64 => {
            let val: i64 = literal
                .parse()
                .wrap_err_with(|| format!("invalid INT64 literal '{}'", literal))?;
            dst.copy_from_slice(&val.to_le_bytes());
        }
        FieldType::Double => {
            let val: f64 = literal
                .parse()
                .wrap_err_with(|| format!("invalid DOUBLE literal '{}'", literal))?;
            dst.copy_from_slice(&val.to_le_bytes());
        }
        FieldType::Bool => {
            let val = match literal {
                "0" => 0u8,
                "1" => 1u8,
                _ => bail!("invalid BOOL literal '{}': expected 0 or 1", literal),
            };
            dst[0] = val;
        }
        FieldType::Str(cap) => {
            let bytes = literal.as_bytes();
            ensure!(
                bytes.len() <= cap as usize,
                "string literal is {} bytes, field capacity is {}",
                bytes.len(),
                cap
            );
            dst[..STRING_PREFIX_SIZE].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
            dst[STRING_PREFIX_SIZE..STRING_PREFIX_SIZE + bytes.len()].copy_from_slice(bytes);
            // stale capacity bytes past the stored length are never read,
            // but zero them so identical values are bit-identical on disk
            dst[STRING_PREFIX_SIZE + bytes.len()..].fill(0);
        }
    }
    Ok(())
}

/// Renders one field's stored bytes as text.
pub(crate) fn format_field(field: &FieldType, src: &[u8], out: &mut String) {
    use std::fmt::Write;

    match field {
        FieldType::Short => {
            let _ = write!(out, "{}", i16::from_le_bytes([src[0], src[1]]));
        }
        FieldType::Int => {
            let _ = write!(out, "{}", i32::from_le_bytes([src[0], src[1], src[2], src[3]]));
        }
        FieldType::Int64 => {
            let _ = write!(out, "{}", i64::from_le_bytes(src.try_into().unwrap()));
        }
        FieldType::Double => {
            let _ = write!(out, "{}", f64::from_le_bytes(src.try_into().unwrap()));
        }
        FieldType::Bool => {
            let _ = write!(out, "{}", src[0]);
        }
        FieldType::Str(cap) => {
            out.push_str(&String::from_utf8_lossy(stored_str_bytes(src, *cap)));
        }
    }
}

fn stored_str_bytes(src: &[u8], cap: u16) -> &[u8] {
    let stored = u16::from_le_bytes([src[0], src[1]]) as usize;
    // a corrupt length prefix must not read past the field boundary
    let stored = stored.min(cap as usize);
    &src[STRING_PREFIX_SIZE..STRING_PREFIX_SIZE + stored]
}
