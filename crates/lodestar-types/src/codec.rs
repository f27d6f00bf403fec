//! Durable-store schema descriptions and encoded field values.
//!
//! Each durable domain type declares a static [`TableSchema`] beside its
//! definition and encodes itself into a row of [`FieldValue`]s in the same
//! column order. The database crate consumes the schema once to derive a
//! write definition and applies store-specific coercion per [`ColumnKind`].

use chrono::{DateTime, Utc};

/// Logical column kind as stored in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Variable-length text.
    Text,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    BigInt,
    /// Arbitrary-precision numeric (used for unsigned 64-bit values).
    Numeric,
    /// Boolean.
    Boolean,
    /// 32-bit float.
    Real,
    /// Timestamp with time zone.
    Timestamp,
    /// Enum written by its symbolic name into a text column.
    Enum,
    /// Structured or array value serialized into a JSON column.
    Json,
}

/// One column of a durable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: &'static str,
    /// Logical kind.
    pub kind: ColumnKind,
}

impl ColumnSpec {
    /// Shorthand constructor for static schema tables.
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }
}

/// Static description of the table a durable type is written to.
///
/// The first column is always the `id` primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table: &'static str,
    /// Columns in encoding order.
    pub columns: &'static [ColumnSpec],
}

impl TableSchema {
    /// Column names in encoding order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }
}

/// A single encoded field, before store-specific coercion.
///
/// Unsigned integers keep their native width here so the coercion step can
/// widen them without loss.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text value.
    Text(String),
    /// Signed 32-bit value.
    I32(i32),
    /// Signed 64-bit value.
    I64(i64),
    /// Unsigned 16-bit value.
    U16(u16),
    /// Unsigned 32-bit value.
    U32(u32),
    /// Unsigned 64-bit value.
    U64(u64),
    /// Boolean value.
    Bool(bool),
    /// 32-bit float.
    F32(f32),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Symbolic enum name.
    Enum(&'static str),
    /// Pre-serialized JSON value.
    Json(serde_json::Value),
    /// SQL NULL.
    Null,
}

impl FieldValue {
    /// Encode any serializable value into a JSON field.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Encode an optional string, mapping `None` to NULL.
    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |v| Self::Text(v.to_owned()))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        Self::U16(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}
