//! Result-set values and discovered table metadata
//!
//! `Value` is what a driver hands back for one cell, before it is mapped to
//! portable JSON by [`crate::mapping`]. `TableName` and `ColumnMetadata` describe
//! what a [`crate::metadata::MetadataSession`] found in the live database.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single cell as decoded by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// BOOLEAN / BIT(1)
    Bool(bool),
    /// TINYINT
    Int8(i8),
    /// SMALLINT
    Int16(i16),
    /// INTEGER
    Int32(i32),
    /// BIGINT
    Int64(i64),
    /// REAL
    Float32(f32),
    /// DOUBLE PRECISION
    Float64(f64),
    /// NUMERIC / DECIMAL, kept exact
    Decimal(Decimal),
    /// Character data of any length
    String(String),
    /// BYTEA / BLOB / VARBINARY
    Bytes(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// Timestamp without zone
    DateTime(NaiveDateTime),
    /// Timestamp normalised to UTC
    DateTimeTz(DateTime<Utc>),
    /// UUID / UNIQUEIDENTIFIER
    Uuid(Uuid),
    /// json / jsonb documents; PostgreSQL arrays may also arrive this way
    Json(serde_json::Value),
    /// Driver-decoded array
    Array(Vec<Value>),
    /// Packed bit string, most significant bit first
    Bit(Vec<u8>),
    /// Enum label
    Enum(String),
}

impl Value {
    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int8(_) => "TINYINT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "VARCHAR",
            Self::Bytes(_) => "BYTEA",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
            Self::Uuid(_) => "UUID",
            Self::Json(_) => "JSONB",
            Self::Array(_) => "ARRAY",
            Self::Bit(_) => "BIT",
            Self::Enum(_) => "ENUM",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(n) => Some(*n != 0),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_f64(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Enum(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to borrow as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) | Self::Bit(b) => Some(b.as_slice()),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Render the value the way it is stored in a cursor checkpoint.
    ///
    /// Returns `None` for NULL and for values that have no stable textual
    /// ordering (JSON documents, arrays, raw bytes).
    pub fn to_cursor_string(&self) -> Option<String> {
        match self {
            Self::String(s) | Self::Enum(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int8(n) => Some(n.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Null | Self::Json(_) | Self::Array(_) | Self::Bytes(_) | Self::Bit(_) => None,
        }
    }
}

/// One result-set row: column labels paired positionally with values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Pair labels with values; both must have the same length
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of columns in the row
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True for a zero-column row
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Look up a value by column label, ignoring ASCII case
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }
}

/// Fully qualified name of a discovered table.
///
/// Which of `catalog` and `schema` is populated depends on the dialect:
/// PostgreSQL and SQL Server fill `schema`, MySQL reports databases as `catalog`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    /// Catalog (database for MySQL)
    pub catalog: Option<String>,
    /// Schema
    pub schema: Option<String>,
    /// Table name
    pub name: String,
}

impl TableName {
    /// Create a table name with neither catalog nor schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
        }
    }

    /// Set schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set catalog
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// The namespace a stream on this table would live in (schema, else catalog)
    pub fn namespace(&self) -> Option<&str> {
        self.schema.as_deref().or(self.catalog.as_deref())
    }

    /// Whether the table lives in the given namespace
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.schema.as_deref() == Some(namespace) || self.catalog.as_deref() == Some(namespace)
    }

    /// Get fully qualified name
    pub fn qualified_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQL type name (vendor-specific)
    pub type_name: String,
    /// Whether column is nullable
    pub nullable: bool,
    /// Primary key ordinal (1-based, None if not PK)
    pub primary_key_ordinal: Option<u32>,
    /// Column ordinal (1-based)
    pub ordinal: u32,
}

impl ColumnMetadata {
    /// Create basic column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            primary_key_ordinal: None,
            ordinal: 0,
        }
    }

    /// Mark the column as part of the primary key
    pub fn primary_key(mut self, ordinal: u32) -> Self {
        self.primary_key_ordinal = Some(ordinal);
        self.nullable = false;
        self
    }

    /// Set column ordinal
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Check if this column is part of the primary key
    #[inline]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key_ordinal.is_some()
    }
}

/// Primary key column names of a table, in key order
pub fn primary_key_columns(columns: &[ColumnMetadata]) -> Vec<String> {
    let mut pk_cols: Vec<_> = columns.iter().filter(|c| c.is_primary_key()).collect();
    pk_cols.sort_by_key(|c| c.primary_key_ordinal);
    pk_cols.into_iter().map(|c| c.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::String("yes".into()).as_bool(), Some(true));
        assert_eq!(Value::String("false".into()).as_bool(), Some(false));

        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::String(" 17 ".into()).as_i64(), Some(17));
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Float64(1.5).as_i64(), None);
        assert_eq!(Value::Decimal(Decimal::new(1200, 2)).as_i64(), Some(12));
        assert_eq!(Value::Decimal(Decimal::new(1250, 2)).as_i64(), None);
    }

    #[test]
    fn test_cursor_string() {
        assert_eq!(Value::Int64(150).to_cursor_string(), Some("150".into()));
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).to_cursor_string(),
            Some("2024-03-01".into())
        );
        assert_eq!(Value::Null.to_cursor_string(), None);
        assert_eq!(Value::Json(serde_json::json!({})).to_cursor_string(), None);
    }

    #[test]
    fn test_row_operations() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int32(1), Value::String("Alice".into())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get_by_name("id"), Some(&Value::Int32(1)));
        assert_eq!(row.get_by_name("email"), None);
        assert_eq!(
            row.get_by_name("NAME"),
            Some(&Value::String("Alice".into()))
        ); // case-insensitive
    }

    #[test]
    fn test_table_name_namespace() {
        let pg = TableName::new("orders").with_schema("sales");
        assert_eq!(pg.qualified_name(), "sales.orders");
        assert!(pg.in_namespace("sales"));

        let mysql = TableName::new("orders").with_catalog("shop");
        assert_eq!(mysql.namespace(), Some("shop"));
        assert!(mysql.in_namespace("shop"));
        assert!(!mysql.in_namespace("sales"));

        assert_eq!(TableName::new("t").to_string(), "t");
    }

    #[test]
    fn test_primary_key_columns_sorted() {
        let columns = vec![
            ColumnMetadata::new("b", "int").primary_key(2),
            ColumnMetadata::new("payload", "text"),
            ColumnMetadata::new("a", "int").primary_key(1),
        ];
        assert_eq!(primary_key_columns(&columns), vec!["a", "b"]);
    }
}
