//! Metadata discovery over a scoped session
//!
//! A [`MetadataSession`] owns exactly one connection for the duration of a
//! discovery pass. Callers must finish with [`MetadataSession::close`]; a
//! session dropped while still open is logged.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, TableName};

/// Column metadata gathered for a set of tables
#[derive(Debug, Default)]
pub struct DiscoveredColumns {
    /// Columns of every readable table
    pub columns: HashMap<TableName, Vec<ColumnMetadata>>,
    /// Tables skipped because their columns could not be read
    pub unreadable: Vec<(TableName, Error)>,
}

impl DiscoveredColumns {
    /// Readable tables, in the order they were asked for
    pub fn readable<'a>(&'a self, tables: &'a [TableName]) -> impl Iterator<Item = &'a TableName> + 'a {
        tables.iter().filter(|t| self.columns.contains_key(*t))
    }
}

/// Scoped metadata-querying session
pub struct MetadataSession {
    conn: Option<Box<dyn Connection>>,
}

impl MetadataSession {
    /// Open a session on a fresh connection
    pub async fn open(factory: &dyn ConnectionFactory, config: &ConnectionConfig) -> Result<Self> {
        let conn = factory.connect(config).await?;
        debug!(database = %factory.database_type(), "Opened metadata session");
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already established connection
    pub fn from_connection(conn: Box<dyn Connection>) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&self) -> Result<&dyn Connection> {
        self.conn
            .as_deref()
            .ok_or_else(|| Error::connection("metadata session is closed"))
    }

    /// List every table visible to the session
    pub async fn list_tables(&self) -> Result<Vec<TableName>> {
        let tables = self.conn()?.list_tables().await?;
        debug!(count = tables.len(), "Discovered tables");
        Ok(tables)
    }

    /// List the columns of one table
    pub async fn columns(&self, table: &TableName) -> Result<Vec<ColumnMetadata>> {
        self.conn()?.list_columns(table).await
    }

    /// Fetch columns for several tables.
    ///
    /// A table whose columns cannot be read is set aside with its error and
    /// discovery moves on. Connection loss and timeouts still abort the pass.
    pub async fn columns_for(&self, tables: &[TableName]) -> Result<DiscoveredColumns> {
        let mut discovered = DiscoveredColumns::default();
        for table in tables {
            match self.columns(table).await {
                Ok(columns) => {
                    discovered.columns.insert(table.clone(), columns);
                }
                Err(e) if e.is_retriable() => return Err(e),
                Err(e) => {
                    warn!(table = %table, error = %e, "Column metadata not readable, skipping table");
                    discovered.unreadable.push((table.clone(), e));
                }
            }
        }
        Ok(discovered)
    }

    /// Release the underlying connection
    pub async fn close(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => {
                let result = conn.close().await;
                debug!("Closed metadata session");
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for MetadataSession {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!("Metadata session dropped without being closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnectionFactory, MockDatabase, MockFailure, MockTable};

    fn database() -> MockDatabase {
        MockDatabase::new()
            .with_table(
                MockTable::new(TableName::new("orders").with_schema("sales"))
                    .column(ColumnMetadata::new("id", "int8").primary_key(1)),
            )
            .with_table(MockTable::new(TableName::new("customers").with_schema("sales")))
    }

    #[tokio::test]
    async fn test_session_lists_and_closes() {
        let db = database();
        let factory = MockConnectionFactory::new(db.clone());
        let session = MetadataSession::open(&factory, &ConnectionConfig::new("mock://"))
            .await
            .unwrap();

        let tables = session.list_tables().await.unwrap();
        assert_eq!(tables.len(), 2);

        let columns = session
            .columns(&TableName::new("orders").with_schema("sales"))
            .await
            .unwrap();
        assert_eq!(columns[0].name, "id");

        session.close().await.unwrap();
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_columns_for_sets_unreadable_tables_aside() {
        let customers = TableName::new("customers").with_schema("sales");
        let db = database().fail_columns_for(
            customers.clone(),
            MockFailure::driver("42501", 1142, "permission denied"),
        );
        let factory = MockConnectionFactory::new(db.clone());
        let session = MetadataSession::open(&factory, &ConnectionConfig::new("mock://"))
            .await
            .unwrap();

        let tables = session.list_tables().await.unwrap();
        let discovered = session.columns_for(&tables).await.unwrap();
        assert_eq!(discovered.columns.len(), 1);
        assert_eq!(discovered.unreadable.len(), 1);
        assert_eq!(discovered.unreadable[0].0, customers);
        assert!(discovered.unreadable[0].1.is_driver_error());
        let readable: Vec<_> = discovered.readable(&tables).collect();
        assert_eq!(readable, vec![&TableName::new("orders").with_schema("sales")]);

        session.close().await.unwrap();
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_columns_for_aborts_on_connection_loss() {
        let db = database().fail_columns_for(
            TableName::new("orders").with_schema("sales"),
            MockFailure::connection("broken pipe"),
        );
        let factory = MockConnectionFactory::new(db.clone());
        let session = MetadataSession::open(&factory, &ConnectionConfig::new("mock://"))
            .await
            .unwrap();

        let tables = session.list_tables().await.unwrap();
        let err = session.columns_for(&tables).await.unwrap_err();
        assert!(err.is_retriable());

        session.close().await.unwrap();
    }
}
