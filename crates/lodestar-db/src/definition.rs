//! Write definitions and column coercion.
//!
//! A [`WriteDefinition`] is derived once per durable type from its static
//! [`TableSchema`] and cached in a [`DefinitionCache`] for the life of the
//! process. It owns the rendered statements and the coercion from the
//! type's encoded [`FieldValue`]s into values `PostgreSQL` accepts natively:
//!
//! | Field | Column | Stored as |
//! |-------|--------|-----------|
//! | `U16` | `Integer` | `INT4` |
//! | `U32` | `BigInt` | `INT8` |
//! | `U64` | `Numeric` | `NUMERIC` |
//! | `Enum` | `Enum` | `TEXT` (symbolic name) |
//! | `Json` | `Json` | `JSONB` (`null` becomes SQL `NULL`) |

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lodestar_types::{ColumnKind, ColumnSpec, DurableRecord, FieldValue, TableSchema};
use rust_decimal::Decimal;

use crate::error::DbError;

/// A value ready to bind, typed even when NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `TEXT`.
    Text(Option<String>),
    /// `INT4`.
    Int4(Option<i32>),
    /// `INT8`.
    Int8(Option<i64>),
    /// `NUMERIC`.
    Numeric(Option<Decimal>),
    /// `BOOL`.
    Bool(Option<bool>),
    /// `FLOAT4`.
    Float4(Option<f32>),
    /// `TIMESTAMPTZ`.
    Timestamp(Option<DateTime<Utc>>),
    /// `JSONB`.
    Json(Option<serde_json::Value>),
}

impl SqlValue {
    /// Whether this is a SQL NULL.
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Text(None)
                | Self::Int4(None)
                | Self::Int8(None)
                | Self::Numeric(None)
                | Self::Bool(None)
                | Self::Float4(None)
                | Self::Timestamp(None)
                | Self::Json(None)
        )
    }

    /// The text payload, if this is a non-null `TEXT`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(Some(s)) => Some(s),
            _ => None,
        }
    }
}

const fn null_of(kind: ColumnKind) -> SqlValue {
    match kind {
        ColumnKind::Text | ColumnKind::Enum => SqlValue::Text(None),
        ColumnKind::Integer => SqlValue::Int4(None),
        ColumnKind::BigInt => SqlValue::Int8(None),
        ColumnKind::Numeric => SqlValue::Numeric(None),
        ColumnKind::Boolean => SqlValue::Bool(None),
        ColumnKind::Real => SqlValue::Float4(None),
        ColumnKind::Timestamp => SqlValue::Timestamp(None),
        ColumnKind::Json => SqlValue::Json(None),
    }
}

/// Convert one encoded field into the store representation of its column.
///
/// # Errors
///
/// Returns [`DbError::Coercion`] if the value cannot be represented in the
/// column without loss.
pub fn coerce(column: &ColumnSpec, value: FieldValue) -> Result<SqlValue, DbError> {
    let kind = column.kind;
    let coerced = match (kind, value) {
        (_, FieldValue::Null) | (ColumnKind::Json, FieldValue::Json(serde_json::Value::Null)) => {
            null_of(kind)
        }
        (ColumnKind::Text | ColumnKind::Enum, FieldValue::Text(s)) => SqlValue::Text(Some(s)),
        (ColumnKind::Text | ColumnKind::Enum, FieldValue::Enum(name)) => {
            SqlValue::Text(Some(name.to_owned()))
        }
        (ColumnKind::Integer, FieldValue::I32(v)) => SqlValue::Int4(Some(v)),
        (ColumnKind::Integer, FieldValue::U16(v)) => SqlValue::Int4(Some(i32::from(v))),
        (ColumnKind::BigInt, FieldValue::I64(v)) => SqlValue::Int8(Some(v)),
        (ColumnKind::BigInt, FieldValue::I32(v)) => SqlValue::Int8(Some(i64::from(v))),
        (ColumnKind::BigInt, FieldValue::U16(v)) => SqlValue::Int8(Some(i64::from(v))),
        (ColumnKind::BigInt, FieldValue::U32(v)) => SqlValue::Int8(Some(i64::from(v))),
        (ColumnKind::Numeric, FieldValue::U64(v)) => SqlValue::Numeric(Some(Decimal::from(v))),
        (ColumnKind::Numeric, FieldValue::U32(v)) => SqlValue::Numeric(Some(Decimal::from(v))),
        (ColumnKind::Numeric, FieldValue::I64(v)) => SqlValue::Numeric(Some(Decimal::from(v))),
        (ColumnKind::Boolean, FieldValue::Bool(v)) => SqlValue::Bool(Some(v)),
        (ColumnKind::Real, FieldValue::F32(v)) => SqlValue::Float4(Some(v)),
        (ColumnKind::Timestamp, FieldValue::Timestamp(v)) => SqlValue::Timestamp(Some(v)),
        (ColumnKind::Json, FieldValue::Json(v)) => SqlValue::Json(Some(v)),
        (_, other) => {
            return Err(DbError::Coercion {
                column: column.name,
                kind,
                value: format!("{other:?}"),
            });
        }
    };
    Ok(coerced)
}

/// Per-type table metadata and rendered statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDefinition {
    /// Domain type name.
    pub type_name: &'static str,
    /// Target table.
    pub table: &'static str,
    /// Columns in binding order; the first is the `id` primary key.
    pub columns: &'static [ColumnSpec],
    /// `DELETE ... WHERE id = $1`.
    pub delete_sql: String,
    insert_prefix: String,
    conflict_clause: String,
}

impl WriteDefinition {
    /// Derive a definition from a schema description.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Schema`] if the schema has no columns or its first
    /// column is not `id`.
    pub fn from_schema(type_name: &'static str, schema: &TableSchema) -> Result<Self, DbError> {
        match schema.columns.first() {
            Some(first) if first.name == "id" => {}
            _ => {
                return Err(DbError::Schema {
                    type_name,
                    reason: "first column must be the `id` primary key".to_owned(),
                });
            }
        }

        let names: Vec<&str> = schema.column_names().collect();
        let insert_prefix = format!("INSERT INTO {} ({}) VALUES ", schema.table, names.join(", "));
        let updates: Vec<String> = names
            .iter()
            .skip(1)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let conflict_clause = if updates.is_empty() {
            " ON CONFLICT (id) DO NOTHING".to_owned()
        } else {
            format!(" ON CONFLICT (id) DO UPDATE SET {}", updates.join(", "))
        };

        Ok(Self {
            type_name,
            table: schema.table,
            columns: schema.columns,
            delete_sql: format!("DELETE FROM {} WHERE id = $1", schema.table),
            insert_prefix,
            conflict_clause,
        })
    }

    /// Render the multi-row upsert for `rows` rows with positional parameters.
    pub fn upsert_sql(&self, rows: usize) -> String {
        let width = self.columns.len();
        let mut sql = self.insert_prefix.clone();
        let mut param = 0_usize;
        for r in 0..rows {
            if r > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for c in 0..width {
                if c > 0 {
                    sql.push_str(", ");
                }
                param = param.saturating_add(1);
                let _ = write!(sql, "${param}");
            }
            sql.push(')');
        }
        sql.push_str(&self.conflict_clause);
        sql
    }

    /// Coerce an encoded row into bindable values.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Schema`] on a width mismatch and
    /// [`DbError::Coercion`] on an unrepresentable value.
    pub fn coerce_row(&self, fields: Vec<FieldValue>) -> Result<Vec<SqlValue>, DbError> {
        if fields.len() != self.columns.len() {
            return Err(DbError::Schema {
                type_name: self.type_name,
                reason: format!(
                    "encoded {} fields for {} columns",
                    fields.len(),
                    self.columns.len()
                ),
            });
        }
        self.columns
            .iter()
            .zip(fields)
            .map(|(column, value)| coerce(column, value))
            .collect()
    }

    /// Encode and coerce a record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or coercion fails.
    pub fn row_of<T: DurableRecord>(&self, record: &T) -> Result<Vec<SqlValue>, DbError> {
        self.coerce_row(record.encode()?)
    }
}

/// Memoized write definitions keyed by type name.
#[derive(Debug, Default)]
pub struct DefinitionCache {
    definitions: DashMap<&'static str, Arc<WriteDefinition>>,
}

impl DefinitionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the definition for `T`, deriving it on first sight of the type.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Schema`] if the type's schema is invalid.
    pub fn get<T: DurableRecord>(&self) -> Result<Arc<WriteDefinition>, DbError> {
        let name = T::META.type_name;
        if let Some(existing) = self.definitions.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        let derived = Arc::new(WriteDefinition::from_schema(name, T::schema())?);
        Ok(Arc::clone(self.definitions.entry(name).or_insert(derived).value()))
    }

    /// Number of definitions derived so far.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no definition has been derived yet.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
