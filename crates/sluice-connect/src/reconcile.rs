//! Catalog reconciliation
//!
//! Matches configured streams against the tables and columns discovered in
//! the live database and produces one [`SelectPlan`] per resolvable stream.
//! Mismatches go to a [`ValidationSink`]; only an unresolvable table removes a
//! stream from the sync.

use serde_json::Value;
use sluice_rdbc::mapping::LogicalType;
use sluice_rdbc::types::{primary_key_columns, ColumnMetadata, TableName};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::catalog::{ConfiguredStream, StreamKey};
use crate::sink::{ValidationFailure, ValidationSink};
use crate::state::CursorValues;

/// Prefix of fields the sync itself populates (CDC bookkeeping)
pub const RESERVED_FIELD_PREFIX: &str = "_cdc_";

/// Whether a field is sync bookkeeping rather than a table column
pub fn is_reserved_field(name: &str) -> bool {
    name.starts_with(RESERVED_FIELD_PREFIX)
}

/// A selected column with its declared and logical type
#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    /// Column name
    pub name: String,
    /// Vendor type name
    pub type_name: String,
    /// Logical type derived from `type_name`
    pub logical_type: LogicalType,
}

impl DataColumn {
    /// Column from discovered metadata
    pub fn from_metadata(column: &ColumnMetadata) -> Self {
        Self {
            name: column.name.clone(),
            type_name: column.type_name.clone(),
            logical_type: LogicalType::from_sql_type(&column.type_name),
        }
    }
}

/// Everything needed to query one stream
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    /// Stream being read
    pub stream: StreamKey,
    /// Table backing the stream
    pub table: TableName,
    /// Data columns emitted in records, in table order
    pub columns: Vec<DataColumn>,
    /// Columns the read is ordered and resumed by
    pub cursor_columns: Vec<String>,
    /// Discovered primary key, in key order
    pub primary_key: Vec<String>,
    /// Resume strictly after these values
    pub cursor_values: CursorValues,
    /// Optional row limit
    pub limit: Option<u64>,
    /// Every column of the table
    pub table_columns: Vec<DataColumn>,
}

impl SelectPlan {
    /// Finalise the plan with the position to resume from
    pub fn with_resume(
        mut self,
        order_by: Vec<String>,
        after: CursorValues,
        limit: Option<u64>,
    ) -> Self {
        self.cursor_columns = order_by;
        self.cursor_values = after;
        self.limit = limit;
        self
    }

    /// Type information of any table column
    pub fn table_column(&self, name: &str) -> Option<&DataColumn> {
        self.table_columns.iter().find(|c| c.name == name)
    }
}

/// Matches configured streams against discovered metadata
pub struct CatalogReconciler;

impl CatalogReconciler {
    /// Build one plan per resolvable stream, reporting every mismatch
    pub fn reconcile(
        streams: &[ConfiguredStream],
        tables: &[TableName],
        columns: &HashMap<TableName, Vec<ColumnMetadata>>,
        failures: &mut dyn ValidationSink,
    ) -> Vec<SelectPlan> {
        let plans: Vec<SelectPlan> = streams
            .iter()
            .filter_map(|stream| Self::plan_stream(stream, tables, columns, failures))
            .collect();
        info!(
            configured = streams.len(),
            planned = plans.len(),
            "Reconciled catalog"
        );
        plans
    }

    fn plan_stream(
        configured: &ConfiguredStream,
        tables: &[TableName],
        columns: &HashMap<TableName, Vec<ColumnMetadata>>,
        failures: &mut dyn ValidationSink,
    ) -> Option<SelectPlan> {
        let key = configured.key();
        let candidates: Vec<&TableName> = tables
            .iter()
            .filter(|t| t.name == key.name)
            .filter(|t| match &key.namespace {
                Some(ns) => t.in_namespace(ns),
                None => true,
            })
            .collect();

        let table = match candidates.as_slice() {
            [] => {
                failures.report(ValidationFailure::TableNotFound { stream: key });
                return None;
            }
            [table] => (*table).clone(),
            many => {
                failures.report(ValidationFailure::AmbiguousTable {
                    stream: key,
                    candidates: many.iter().map(|t| (*t).clone()).collect(),
                });
                return None;
            }
        };

        let mut table_columns: Vec<ColumnMetadata> =
            columns.get(&table).cloned().unwrap_or_default();
        table_columns.sort_by_key(|c| c.ordinal);

        let fields = configured.stream.field_names();
        for field in &fields {
            if is_reserved_field(field) {
                continue;
            }
            if !table_columns.iter().any(|c| &c.name == field) {
                failures.report(ValidationFailure::ColumnNotFound {
                    stream: key.clone(),
                    column: field.clone(),
                });
            }
        }

        let mut data_columns = Vec::new();
        for column in &table_columns {
            if !fields.contains(&column.name) {
                continue;
            }
            let data_column = DataColumn::from_metadata(column);
            if let Some(expected) = configured.stream.field_schema(&column.name) {
                let actual = data_column.logical_type.json_schema();
                if !schemas_compatible(expected, &actual) {
                    failures.report(ValidationFailure::TypeMismatch {
                        stream: key.clone(),
                        column: column.name.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
            data_columns.push(data_column);
        }

        let cursor_columns = configured.cursor_columns();
        for cursor in &cursor_columns {
            if !table_columns.iter().any(|c| &c.name == cursor) {
                failures.report(ValidationFailure::ColumnNotFound {
                    stream: key.clone(),
                    column: cursor.clone(),
                });
            }
        }

        let mut primary_key = primary_key_columns(&table_columns);
        if primary_key.is_empty() {
            primary_key = configured.primary_key_columns();
        }

        debug!(
            stream = %key,
            table = %table,
            columns = data_columns.len(),
            "Planned stream"
        );
        Some(SelectPlan {
            stream: key,
            table,
            columns: data_columns,
            cursor_columns,
            primary_key,
            cursor_values: CursorValues::new(),
            limit: None,
            table_columns: table_columns.iter().map(DataColumn::from_metadata).collect(),
        })
    }
}

/// Compare a configured field schema with a derived one.
///
/// `type` is compared as a set with `null` removed; `format` only when both
/// sides declare one. A configured schema without `type` accepts anything.
pub fn schemas_compatible(expected: &Value, actual: &Value) -> bool {
    let (Some(expected_types), Some(actual_types)) = (schema_types(expected), schema_types(actual))
    else {
        return true;
    };
    if expected_types != actual_types {
        return false;
    }
    match (
        expected.get("format").and_then(Value::as_str),
        actual.get("format").and_then(Value::as_str),
    ) {
        (Some(e), Some(a)) => e == a,
        _ => true,
    }
}

fn schema_types(schema: &Value) -> Option<Vec<String>> {
    let mut types: Vec<String> = match schema.get("type")? {
        Value::String(t) => vec![t.clone()],
        Value::Array(ts) => ts
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    types.retain(|t| t != "null");
    types.sort();
    types.dedup();
    Some(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_comparison() {
        assert!(schemas_compatible(
            &json!({"type": ["null", "integer"]}),
            &json!({"type": "integer"})
        ));
        assert!(!schemas_compatible(
            &json!({"type": "string"}),
            &json!({"type": "integer"})
        ));
        assert!(!schemas_compatible(
            &json!({"type": "string", "format": "date"}),
            &json!({"type": "string", "format": "date-time"})
        ));
        assert!(schemas_compatible(
            &json!({"type": "string"}),
            &json!({"type": "string", "format": "date"})
        ));
        assert!(schemas_compatible(&json!({}), &json!({"type": "integer"})));
    }

    #[test]
    fn test_reserved_fields() {
        assert!(is_reserved_field("_cdc_lsn"));
        assert!(!is_reserved_field("cdc_lsn"));
    }
}
