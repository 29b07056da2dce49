//! Typed value mapping
//!
//! Converts driver-native [`Value`]s into portable JSON values according to a
//! column's declared [`LogicalType`]. Leaf types carry a default for NULL;
//! array types map every element recursively and decide what a NULL array
//! becomes.
//!
//! ```rust
//! use sluice_rdbc::mapping::{map_column, LogicalType};
//! use sluice_rdbc::Value;
//!
//! let ty = LogicalType::from_sql_type("int4");
//! assert_eq!(map_column("id", &Value::Int32(7), &ty).unwrap(), serde_json::json!(7));
//! assert!(map_column("id", &Value::String("seven".into()), &ty).is_err());
//! ```

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Scalar kinds a column can map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    /// true/false
    Boolean,
    /// Whole numbers
    Integer,
    /// Floating point and exact numerics
    Number,
    /// Text
    String,
    /// Calendar date
    Date,
    /// Time of day
    Time,
    /// Timestamp without zone
    Timestamp,
    /// Timestamp with zone, rendered in UTC
    TimestampTz,
    /// Raw bytes, rendered as base64
    Binary,
    /// JSON document, passed through
    Json,
    /// UUID, rendered in hyphenated form
    Uuid,
}

impl LeafKind {
    /// Declared name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMP_WITH_TIMEZONE",
            Self::Binary => "BINARY",
            Self::Json => "JSON",
            Self::Uuid => "UUID",
        }
    }
}

/// What a NULL leaf value maps to
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DefaultPolicy {
    /// JSON null
    #[default]
    Null,
    /// A fixed portable value
    Value(JsonValue),
}

/// What a NULL array maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullArrayPolicy {
    /// JSON null
    #[default]
    Null,
    /// Empty JSON array
    Empty,
}

/// Scalar column type
#[derive(Debug, Clone, PartialEq)]
pub struct LeafType {
    /// Scalar kind
    pub kind: LeafKind,
    /// Default for NULL values
    pub default: DefaultPolicy,
}

/// Array column type
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    /// Element type
    pub item: Box<LogicalType>,
    /// Policy for NULL arrays
    pub on_null: NullArrayPolicy,
}

/// Declared logical type of a column
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalType {
    /// Scalar
    Leaf(LeafType),
    /// Array of another logical type
    Array(ArrayType),
}

impl LogicalType {
    /// Leaf type with a NULL default
    pub fn leaf(kind: LeafKind) -> Self {
        Self::Leaf(LeafType {
            kind,
            default: DefaultPolicy::Null,
        })
    }

    /// Leaf type with a fixed default for NULL
    pub fn leaf_with_default(kind: LeafKind, default: JsonValue) -> Self {
        Self::Leaf(LeafType {
            kind,
            default: DefaultPolicy::Value(default),
        })
    }

    /// Array type whose NULL maps to JSON null
    pub fn array(item: LogicalType) -> Self {
        Self::Array(ArrayType {
            item: Box::new(item),
            on_null: NullArrayPolicy::Null,
        })
    }

    /// Array type whose NULL maps to an empty array
    pub fn array_or_empty(item: LogicalType) -> Self {
        Self::Array(ArrayType {
            item: Box::new(item),
            on_null: NullArrayPolicy::Empty,
        })
    }

    /// Derive the logical type from a vendor SQL type name.
    ///
    /// Unknown types fall back to [`LeafKind::String`].
    pub fn from_sql_type(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        if lowered == "tinyint(1)" || lowered == "bit(1)" {
            return Self::leaf(LeafKind::Boolean);
        }

        // PostgreSQL reports array columns as `_int4` (udt) or `integer[]`
        if let Some(item) = lowered.strip_suffix("[]") {
            return Self::array(Self::from_sql_type(item));
        }
        if let Some(item) = lowered.strip_prefix('_') {
            return Self::array(Self::from_sql_type(item));
        }
        if lowered == "array" {
            return Self::array(Self::leaf(LeafKind::String));
        }

        let normalized = normalize_type_name(&lowered);
        let kind = match normalized.as_str() {
            "bool" | "boolean" => LeafKind::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2"
            | "int4" | "int8" | "serial" | "smallserial" | "bigserial" | "year" => {
                LeafKind::Integer
            }
            "real" | "float" | "float4" | "float8" | "double" | "double precision" | "numeric"
            | "decimal" | "money" | "smallmoney" => LeafKind::Number,
            "date" => LeafKind::Date,
            "time" | "time without time zone" | "time with time zone" | "timetz" => LeafKind::Time,
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime2"
            | "smalldatetime" => LeafKind::Timestamp,
            "timestamptz" | "timestamp with time zone" | "datetimeoffset" => {
                LeafKind::TimestampTz
            }
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary"
            | "varbinary" | "image" | "bit" | "bit varying" | "varbit" => LeafKind::Binary,
            "json" | "jsonb" => LeafKind::Json,
            "uuid" | "uniqueidentifier" => LeafKind::Uuid,
            _ => LeafKind::String,
        };
        Self::leaf(kind)
    }

    /// Declared name used in diagnostics, e.g. `ARRAY<INTEGER>`
    pub fn name(&self) -> String {
        match self {
            Self::Leaf(leaf) => leaf.kind.name().to_string(),
            Self::Array(array) => format!("ARRAY<{}>", array.item.name()),
        }
    }

    /// Portable JSON schema for values of this type
    pub fn json_schema(&self) -> JsonValue {
        match self {
            Self::Leaf(leaf) => match leaf.kind {
                LeafKind::Boolean => json!({"type": "boolean"}),
                LeafKind::Integer => json!({"type": "integer"}),
                LeafKind::Number => json!({"type": "number"}),
                LeafKind::String => json!({"type": "string"}),
                LeafKind::Date => json!({"type": "string", "format": "date"}),
                LeafKind::Time => json!({"type": "string", "format": "time"}),
                LeafKind::Timestamp | LeafKind::TimestampTz => {
                    json!({"type": "string", "format": "date-time"})
                }
                LeafKind::Binary => json!({"type": "string", "contentEncoding": "base64"}),
                LeafKind::Json => json!({"type": "object"}),
                LeafKind::Uuid => json!({"type": "string", "format": "uuid"}),
            },
            Self::Array(array) => json!({"type": "array", "items": array.item.json_schema()}),
        }
    }

    /// Parse a checkpointed cursor string back into a bindable parameter
    pub fn cursor_param(&self, raw: &str) -> Result<Value> {
        let leaf = match self {
            Self::Leaf(leaf) => leaf,
            Self::Array(_) => {
                return Err(Error::type_conversion(format!(
                    "array column cannot be used as a cursor: {}",
                    self.name()
                )))
            }
        };
        let conversion = |what: &str| {
            Error::type_conversion(format!("cursor value '{}' is not a valid {}", raw, what))
        };
        Ok(match leaf.kind {
            LeafKind::Integer => Value::Int64(raw.trim().parse().map_err(|_| conversion("integer"))?),
            LeafKind::Number => {
                Value::Decimal(Decimal::from_str(raw.trim()).map_err(|_| conversion("number"))?)
            }
            LeafKind::Boolean => Value::String(raw.to_string())
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| conversion("boolean"))?,
            LeafKind::Date => Value::Date(parse_date(raw).ok_or_else(|| conversion("date"))?),
            LeafKind::Time => Value::Time(parse_time(raw).ok_or_else(|| conversion("time"))?),
            LeafKind::Timestamp => {
                Value::DateTime(parse_timestamp(raw).ok_or_else(|| conversion("timestamp"))?)
            }
            LeafKind::TimestampTz => {
                Value::DateTimeTz(parse_timestamp_tz(raw).ok_or_else(|| conversion("timestamp"))?)
            }
            LeafKind::Uuid => {
                Value::Uuid(uuid::Uuid::parse_str(raw.trim()).map_err(|_| conversion("uuid"))?)
            }
            LeafKind::String | LeafKind::Binary | LeafKind::Json => Value::String(raw.to_string()),
        })
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Map one column value, wrapping failures with the column name and declared type
pub fn map_column(column: &str, value: &Value, ty: &LogicalType) -> Result<JsonValue> {
    map_value(value, ty).map_err(|e| Error::data(column, ty.name(), &e))
}

/// Map a driver-native value to its portable representation
pub fn map_value(value: &Value, ty: &LogicalType) -> Result<JsonValue> {
    match ty {
        LogicalType::Leaf(leaf) => map_leaf(value, leaf),
        LogicalType::Array(array) => map_array(value, array),
    }
}

fn map_leaf(value: &Value, leaf: &LeafType) -> Result<JsonValue> {
    let value = match value {
        Value::Json(JsonValue::Null) | Value::Null => {
            return Ok(match &leaf.default {
                DefaultPolicy::Null => JsonValue::Null,
                DefaultPolicy::Value(v) => v.clone(),
            })
        }
        // Scalars embedded in JSON arrays arrive as JSON; only Json columns keep them as-is
        Value::Json(j) if leaf.kind != LeafKind::Json => json_scalar(j),
        other => other.clone(),
    };

    let mismatch = || {
        Error::type_conversion(format!(
            "{} value is not compatible with {}",
            value.sql_type(),
            leaf.kind.name()
        ))
    };

    match leaf.kind {
        LeafKind::Boolean => value.as_bool().map(JsonValue::Bool).ok_or_else(mismatch),
        LeafKind::Integer => match &value {
            Value::Float32(_) | Value::Float64(_) => {
                let f = value.as_f64().ok_or_else(mismatch)?;
                // 2^63 itself is out of range; the cast would saturate
                if f.fract() == 0.0 && f >= I64_MIN_F && f < -I64_MIN_F {
                    Ok(json!(f as i64))
                } else {
                    Err(mismatch())
                }
            }
            _ => value.as_i64().map(|n| json!(n)).ok_or_else(mismatch),
        },
        LeafKind::Number => match &value {
            Value::Int8(_) | Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => {
                value.as_i64().map(|n| json!(n)).ok_or_else(mismatch)
            }
            Value::Decimal(d) => exact_number(d),
            Value::String(s) => match Decimal::from_str(s.trim()) {
                Ok(d) => exact_number(&d),
                Err(_) => float_number(value.as_f64().ok_or_else(mismatch)?),
            },
            Value::Float32(_) | Value::Float64(_) => {
                float_number(value.as_f64().ok_or_else(mismatch)?)
            }
            _ => Err(mismatch()),
        },
        LeafKind::String => match &value {
            Value::Json(j) => Ok(JsonValue::String(j.to_string())),
            Value::Bit(bits) => Ok(JsonValue::String(hex::encode(bits))),
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map(JsonValue::String)
                .map_err(|_| mismatch()),
            other => other
                .to_cursor_string()
                .map(JsonValue::String)
                .ok_or_else(mismatch),
        },
        LeafKind::Date => match &value {
            Value::Date(d) => Ok(json!(d.format(DATE_FORMAT).to_string())),
            Value::DateTime(dt) => Ok(json!(dt.date().format(DATE_FORMAT).to_string())),
            Value::DateTimeTz(dt) => Ok(json!(dt.date_naive().format(DATE_FORMAT).to_string())),
            Value::String(s) => parse_date(s)
                .map(|d| json!(d.format(DATE_FORMAT).to_string()))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        LeafKind::Time => match &value {
            Value::Time(t) => Ok(json!(t.format(TIME_FORMAT).to_string())),
            Value::String(s) => parse_time(s)
                .map(|t| json!(t.format(TIME_FORMAT).to_string()))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        LeafKind::Timestamp => match &value {
            Value::DateTime(dt) => Ok(json!(dt.format(TIMESTAMP_FORMAT).to_string())),
            Value::Date(d) => Ok(json!(d
                .and_time(NaiveTime::MIN)
                .format(TIMESTAMP_FORMAT)
                .to_string())),
            Value::String(s) => parse_timestamp(s)
                .map(|dt| json!(dt.format(TIMESTAMP_FORMAT).to_string()))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        LeafKind::TimestampTz => match &value {
            Value::DateTimeTz(dt) => Ok(json!(dt.to_rfc3339())),
            Value::DateTime(dt) => Ok(json!(dt.and_utc().to_rfc3339())),
            Value::String(s) => parse_timestamp_tz(s)
                .map(|dt| json!(dt.to_rfc3339()))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        LeafKind::Binary => value
            .as_bytes()
            .map(|b| json!(base64::engine::general_purpose::STANDARD.encode(b)))
            .ok_or_else(mismatch),
        LeafKind::Json => match &value {
            Value::Json(j) => Ok(j.clone()),
            Value::String(s) => serde_json::from_str(s).map_err(|e| {
                Error::type_conversion(format!("invalid JSON document: {}", e))
            }),
            _ => Err(mismatch()),
        },
        LeafKind::Uuid => match &value {
            Value::Uuid(u) => Ok(json!(u.to_string())),
            Value::String(s) => uuid::Uuid::parse_str(s.trim())
                .map(|u| json!(u.to_string()))
                .map_err(|_| mismatch()),
            Value::Bytes(b) if b.len() == 16 => uuid::Uuid::from_slice(b)
                .map(|u| json!(u.to_string()))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
    }
}

fn map_array(value: &Value, array: &ArrayType) -> Result<JsonValue> {
    let elements: Vec<Value> = match value {
        Value::Null | Value::Json(JsonValue::Null) => {
            return Ok(match array.on_null {
                NullArrayPolicy::Null => JsonValue::Null,
                NullArrayPolicy::Empty => JsonValue::Array(Vec::new()),
            })
        }
        Value::Array(items) => items.clone(),
        Value::Json(JsonValue::Array(items)) => items.iter().cloned().map(Value::Json).collect(),
        other => {
            return Err(Error::type_conversion(format!(
                "{} value is not an array",
                other.sql_type()
            )))
        }
    };

    elements
        .iter()
        .enumerate()
        .map(|(idx, element)| {
            map_value(element, &array.item).map_err(|e| {
                Error::type_conversion(format!("element {}: {}", idx, conversion_message(&e)))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(JsonValue::Array)
}

fn conversion_message(err: &Error) -> String {
    match err {
        Error::TypeConversion { message } => message.clone(),
        other => other.to_string(),
    }
}

const I64_MIN_F: f64 = i64::MIN as f64;

/// JSON number carrying every digit of the decimal
fn exact_number(d: &Decimal) -> Result<JsonValue> {
    serde_json::Number::from_str(&d.normalize().to_string())
        .map(JsonValue::Number)
        .map_err(|e| Error::type_conversion(format!("decimal {} has no JSON form: {}", d, e)))
}

fn float_number(f: f64) -> Result<JsonValue> {
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .ok_or_else(|| Error::type_conversion(format!("non-finite number {} has no JSON form", f)))
}

fn json_scalar(j: &JsonValue) -> Value {
    match j {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match (n.as_i64(), Decimal::from_str(&n.to_string())) {
            (Some(i), _) => Value::Int64(i),
            (None, Ok(d)) => Value::Decimal(d),
            (None, Err(_)) => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::String(s.clone()),
        other => Value::Json(other.clone()),
    }
}

/// Lowercase name without length/precision arguments or `unsigned`
fn normalize_type_name(lowered: &str) -> String {
    let mut out = String::with_capacity(lowered.len());
    let mut depth = 0usize;
    for c in lowered.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace()
        .filter(|word| *word != "unsigned" && *word != "zerofill")
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn parse_timestamp_tz(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
