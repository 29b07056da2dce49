//! Cursor values and their accumulation during a read

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_rdbc::types::Row;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Last-seen values of a stream's cursor columns, as strings.
///
/// Serialises as a plain JSON object (`{"id":"150"}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorValues(BTreeMap<String, String>);

impl CursorValues {
    /// No values
    pub fn new() -> Self {
        Self::default()
    }

    /// A single column's value
    pub fn single(column: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = Self::new();
        values.insert(column, value);
        values
    }

    /// Set a column's value
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// A column's value
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Whether no column has a value
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every listed column has a value
    pub fn covers(&self, columns: &[String]) -> bool {
        columns.iter().all(|c| self.0.contains_key(c))
    }

    /// Iterate over (column, value)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as a checkpoint payload
    pub fn to_payload(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Read a checkpoint payload written by [`CursorValues::to_payload`].
    ///
    /// Scalar numbers and booleans are accepted and stringified; anything else
    /// (nested values, an empty object) means there is no cursor.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let obj = payload.as_object()?;
        let mut values = Self::new();
        for (column, value) in obj {
            match value {
                Value::String(s) => values.insert(column.clone(), s.clone()),
                Value::Number(n) => values.insert(column.clone(), n.to_string()),
                Value::Bool(b) => values.insert(column.clone(), b.to_string()),
                Value::Null => {}
                Value::Array(_) | Value::Object(_) => return None,
            }
        }
        (!values.is_empty()).then_some(values)
    }
}

/// Compare two cursor positions column by column, in `columns` order.
///
/// Values compare numerically when both parse as numbers, lexically otherwise.
/// A missing value sorts before any present one.
pub fn compare_cursor_values(a: &CursorValues, b: &CursorValues, columns: &[String]) -> Ordering {
    let keys: Vec<&str> = if columns.is_empty() {
        let mut all: Vec<&str> = a.0.keys().chain(b.0.keys()).map(String::as_str).collect();
        all.sort_unstable();
        all.dedup();
        all
    } else {
        columns.iter().map(String::as_str).collect()
    };

    for column in keys {
        let ord = match (a.get(column), b.get(column)) {
            (Some(x), Some(y)) => compare_scalar(x, y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_scalar(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (a.trim().parse::<i128>(), b.trim().parse::<i128>()) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        if let Some(ord) = x.partial_cmp(&y) {
            return ord;
        }
    }
    a.cmp(b)
}

/// Tracks the last-seen values of the columns a read resumes by
#[derive(Debug, Clone)]
pub struct CursorAccumulator {
    columns: Vec<String>,
    values: CursorValues,
    rows: u64,
}

impl CursorAccumulator {
    /// Accumulator starting from a known position
    pub fn new(columns: Vec<String>, start: CursorValues) -> Self {
        Self {
            columns,
            values: start,
            rows: 0,
        }
    }

    /// Record one row in result-set order
    pub fn observe(&mut self, row: &Row) {
        for column in &self.columns {
            if let Some(value) = row.get_by_name(column).and_then(|v| v.to_cursor_string()) {
                self.values.insert(column.clone(), value);
            }
        }
        self.rows += 1;
    }

    /// Columns being tracked
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values after the last observed row
    pub fn values(&self) -> &CursorValues {
        &self.values
    }

    /// Rows observed
    pub fn rows(&self) -> u64 {
        self.rows
    }
}
