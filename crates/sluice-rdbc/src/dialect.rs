//! SQL dialect abstraction for sluice-rdbc
//!
//! Only the pieces the read path needs: identifier quoting, parameter
//! placeholders and row limiting.

use crate::connection::DatabaseType;
use crate::types::TableName;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (e.g., $1, ?, @p1), 1-based
    fn placeholder(&self, index: usize) -> String;

    /// Trailing clause limiting the result to `limit` rows
    fn limit_sql(&self, limit: u64) -> String {
        format!(" LIMIT {}", limit)
    }

    /// Whether [`SqlDialect::limit_sql`] is only valid after an ORDER BY
    fn limit_requires_order(&self) -> bool {
        false
    }

    /// Quoted, namespace-qualified table reference
    fn qualified_table(&self, table: &TableName) -> String {
        match table.namespace() {
            Some(ns) => format!(
                "{}.{}",
                self.quote_identifier(ns),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}

/// MySQL dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

/// SQL Server dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn limit_sql(&self, limit: u64) -> String {
        format!(" OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY", limit)
    }

    fn limit_requires_order(&self) -> bool {
        true
    }

    fn qualified_table(&self, table: &TableName) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(catalog) = &table.catalog {
            parts.push(self.quote_identifier(catalog));
        }
        if let Some(schema) = &table.schema {
            parts.push(self.quote_identifier(schema));
        }
        parts.push(self.quote_identifier(&table.name));
        parts.join(".")
    }
}

/// Get the dialect for a database type
pub fn dialect_for(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
        DatabaseType::SqlServer => Box::new(SqlServerDialect),
    }
}
