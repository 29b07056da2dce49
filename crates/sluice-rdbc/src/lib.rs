//! # sluice-rdbc
//!
//! Relational database connectivity for sluice sources.
//!
//! This crate is the database-facing half of sluice: it defines how a source
//! talks to a relational database without tying it to any particular driver.
//!
//! ## Features
//!
//! - **Connection Abstraction**: async [`Connection`](connection::Connection) and
//!   [`ConnectionFactory`](connection::ConnectionFactory) traits drivers implement
//! - **Scoped Metadata Sessions**: table and column discovery over one connection
//!   that is always explicitly released
//! - **SQL Dialects**: identifier quoting, placeholders and row limits for
//!   PostgreSQL, MySQL and SQL Server
//! - **Typed Value Mapping**: a [`LogicalType`](mapping::LogicalType) per column,
//!   mapping driver values to portable JSON and rejecting incompatible ones
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice_rdbc::prelude::*;
//!
//! let session = MetadataSession::open(&factory, &ConnectionConfig::new(url)).await?;
//! let tables = session.list_tables().await?;
//! let discovered = session.columns_for(&tables).await?;
//! session.close().await?;
//!
//! let ty = LogicalType::from_sql_type(&discovered.columns[&tables[0]][0].type_name);
//! let json = map_column("id", &Value::Int64(7), &ty)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `testing` - scripted in-memory database ([`testing::MockDatabase`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod mapping;
pub mod metadata;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and metadata types
    pub use crate::types::{primary_key_columns, ColumnMetadata, Row, TableName, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream,
    };

    // Dialect types
    pub use crate::dialect::{
        dialect_for, MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect,
    };

    // Metadata discovery
    pub use crate::metadata::{DiscoveredColumns, MetadataSession};

    // Value mapping
    pub use crate::mapping::{
        map_column, map_value, ArrayType, DefaultPolicy, LeafKind, LeafType, LogicalType,
        NullArrayPolicy,
    };
}

pub use error::{Error, Result};
pub use types::Value;
