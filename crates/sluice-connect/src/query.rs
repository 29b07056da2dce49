//! SQL generation for planned stream reads
//!
//! Queries select the plan's data columns (plus any ordering column not among
//! them), resume strictly after the last position using a lexicographic
//! predicate, and are ordered by the resume columns so cursor values advance
//! with result-set order.

use sluice_rdbc::dialect::SqlDialect;
use sluice_rdbc::types::Value;

use crate::error::{ConnectorError, Result};
use crate::reconcile::SelectPlan;

/// Query builder for one planned stream
pub struct SelectQueryBuilder<'a> {
    plan: &'a SelectPlan,
    dialect: &'a dyn SqlDialect,
}

impl<'a> SelectQueryBuilder<'a> {
    /// Create a new query builder
    pub fn new(plan: &'a SelectPlan, dialect: &'a dyn SqlDialect) -> Self {
        Self { plan, dialect }
    }

    /// Names of the selected columns, data columns first
    pub fn selected_columns(&self) -> Vec<&'a str> {
        let plan = self.plan;
        let mut names: Vec<&str> = plan.columns.iter().map(|c| c.name.as_str()).collect();
        for cursor in &plan.cursor_columns {
            if !names.contains(&cursor.as_str()) {
                names.push(cursor.as_str());
            }
        }
        names
    }

    /// Build the statement and its bound parameters
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        let columns = self.selected_columns();
        if columns.is_empty() {
            return Err(ConnectorError::config(format!(
                "stream {} selects no columns",
                self.plan.stream
            )));
        }

        let cols_str: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            cols_str.join(", "),
            self.dialect.qualified_table(&self.plan.table)
        );

        let mut params = Vec::new();
        let order = &self.plan.cursor_columns;
        if !order.is_empty() && self.plan.cursor_values.covers(order) {
            let bound = order
                .iter()
                .map(|c| self.cursor_param(c))
                .collect::<Result<Vec<_>>>()?;

            // (a > ?) OR (a = ? AND b > ?) OR ...
            let mut disjuncts = Vec::with_capacity(order.len());
            for (i, column) in order.iter().enumerate() {
                let mut terms = Vec::with_capacity(i + 1);
                for (prefix, value) in order.iter().zip(&bound).take(i) {
                    params.push(value.clone());
                    terms.push(format!(
                        "{} = {}",
                        self.dialect.quote_identifier(prefix),
                        self.dialect.placeholder(params.len())
                    ));
                }
                params.push(bound[i].clone());
                terms.push(format!(
                    "{} > {}",
                    self.dialect.quote_identifier(column),
                    self.dialect.placeholder(params.len())
                ));
                disjuncts.push(format!("({})", terms.join(" AND ")));
            }
            sql.push_str(" WHERE ");
            sql.push_str(&disjuncts.join(" OR "));
        }

        if !order.is_empty() {
            let order_by: Vec<String> = order
                .iter()
                .map(|c| format!("{} ASC", self.dialect.quote_identifier(c)))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }

        if let Some(limit) = self.plan.limit {
            if order.is_empty() && self.dialect.limit_requires_order() {
                sql.push_str(" ORDER BY (SELECT NULL)");
            }
            sql.push_str(&self.dialect.limit_sql(limit));
        }

        Ok((sql, params))
    }

    fn cursor_param(&self, column: &str) -> Result<Value> {
        let raw = self.plan.cursor_values.get(column).unwrap_or_default();
        match self.plan.table_column(column) {
            Some(col) => Ok(col.logical_type.cursor_param(raw)?),
            None => Ok(Value::String(raw.to_string())),
        }
    }
}
