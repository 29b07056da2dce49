//! In-memory database for tests
//!
//! [`MockDatabase`] is a cheap, cloneable handle to shared state: tables with
//! scripted rows, injected failures and a log of everything the code under
//! test did (statements, session settings, open connections).
//!
//! The mock does not evaluate SQL. A query is routed to the table whose
//! dialect-qualified name appears in the statement and returns that table's
//! scripted rows, honouring a trailing row limit.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream};
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Row, TableName, Value};

/// Failure to inject into the mock, materialised as an [`Error`] on every use
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    /// Driver error with SQLSTATE and vendor code
    Driver {
        /// SQLSTATE
        sql_state: String,
        /// Vendor error code
        vendor_code: i32,
        /// Driver message
        message: String,
    },
    /// Connection-level failure
    Connection(String),
    /// Timeout
    Timeout(String),
    /// Query failure without driver details
    Query(String),
}

impl MockFailure {
    /// Driver failure
    pub fn driver(sql_state: impl Into<String>, vendor_code: i32, message: impl Into<String>) -> Self {
        Self::Driver {
            sql_state: sql_state.into(),
            vendor_code,
            message: message.into(),
        }
    }

    /// Connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Build the error this failure stands for
    pub fn to_error(&self) -> Error {
        match self {
            Self::Driver {
                sql_state,
                vendor_code,
                message,
            } => Error::driver(sql_state.clone(), *vendor_code, message.clone()),
            Self::Connection(message) => Error::connection(message.clone()),
            Self::Timeout(message) => Error::timeout(message.clone()),
            Self::Query(message) => Error::query(message.clone()),
        }
    }
}

/// A table held by the mock
#[derive(Debug, Clone)]
pub struct MockTable {
    name: TableName,
    columns: Vec<ColumnMetadata>,
    rows: Vec<Vec<Value>>,
}

impl MockTable {
    /// Empty table without columns
    pub fn new(name: TableName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a column; ordinals are assigned in insertion order
    pub fn column(mut self, column: ColumnMetadata) -> Self {
        let ordinal = self.columns.len() as u32 + 1;
        self.columns.push(column.with_ordinal(ordinal));
        self
    }

    /// Append a row, values in column order
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Append many rows
    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Table name
    pub fn name(&self) -> &TableName {
        &self.name
    }
}

/// A statement executed against the mock
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    /// SQL text
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
}

/// A session setting applied through the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    /// `set_read_only`
    ReadOnly(bool),
    /// `set_catalog`
    Catalog(String),
    /// `set_schema`
    Schema(String),
}

#[derive(Default)]
struct MockState {
    database_type: DatabaseType,
    tables: Vec<MockTable>,
    connect_failure: Option<MockFailure>,
    list_tables_failure: Option<MockFailure>,
    column_failures: HashMap<TableName, MockFailure>,
    query_failures: HashMap<TableName, (usize, MockFailure)>,
    open_connections: usize,
    total_connections: usize,
    executed: Vec<ExecutedQuery>,
    session_calls: Vec<SessionCall>,
}

/// Shared handle to an in-memory database
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    /// Empty PostgreSQL-flavoured database
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the reported database type (and therefore the dialect)
    pub fn with_database_type(self, database_type: DatabaseType) -> Self {
        self.state.lock().database_type = database_type;
        self
    }

    /// Add a table
    pub fn with_table(self, table: MockTable) -> Self {
        self.state.lock().tables.push(table);
        self
    }

    /// Make every connection attempt fail
    pub fn fail_connect(self, failure: MockFailure) -> Self {
        self.state.lock().connect_failure = Some(failure);
        self
    }

    /// Make table listing fail
    pub fn fail_list_tables(self, failure: MockFailure) -> Self {
        self.state.lock().list_tables_failure = Some(failure);
        self
    }

    /// Make column discovery fail for one table
    pub fn fail_columns_for(self, table: TableName, failure: MockFailure) -> Self {
        self.state.lock().column_failures.insert(table, failure);
        self
    }

    /// Make queries on one table fail before returning any row
    pub fn fail_query_for(self, table: TableName, failure: MockFailure) -> Self {
        self.fail_query_after(table, 0, failure)
    }

    /// Make queries on one table fail after `rows` rows were streamed
    pub fn fail_query_after(self, table: TableName, rows: usize, failure: MockFailure) -> Self {
        self.state.lock().query_failures.insert(table, (rows, failure));
        self
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    /// Connections opened over the lifetime of the mock
    pub fn total_connections(&self) -> usize {
        self.state.lock().total_connections
    }

    /// Statements executed so far
    pub fn executed(&self) -> Vec<ExecutedQuery> {
        self.state.lock().executed.clone()
    }

    /// Session settings applied so far
    pub fn session_calls(&self) -> Vec<SessionCall> {
        self.state.lock().session_calls.clone()
    }

    fn connect(&self) -> Result<MockConnection> {
        let mut state = self.state.lock();
        if let Some(failure) = &state.connect_failure {
            return Err(failure.to_error());
        }
        state.open_connections += 1;
        state.total_connections += 1;
        Ok(MockConnection {
            db: self.clone(),
            closed: Mutex::new(false),
        })
    }
}

/// Connection factory backed by a [`MockDatabase`]
#[derive(Clone)]
pub struct MockConnectionFactory {
    db: MockDatabase,
}

impl MockConnectionFactory {
    /// Factory handing out connections to `db`
    pub fn new(db: MockDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.db.connect()?))
    }

    fn database_type(&self) -> DatabaseType {
        self.db.state.lock().database_type
    }
}

struct MockConnection {
    db: MockDatabase,
    closed: Mutex<bool>,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<()> {
        if *self.closed.lock() {
            Err(Error::connection("connection is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Pin<Box<dyn RowStream>>> {
        self.ensure_open()?;
        let dialect = self.dialect();
        let mut state = self.db.state.lock();
        state.executed.push(ExecutedQuery {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let table = state
            .tables
            .iter()
            .find(|t| sql.contains(&dialect.qualified_table(&t.name)))
            .cloned()
            .ok_or_else(|| Error::query_with_sql("no mock table matches statement", sql))?;

        let failure = state.query_failures.get(&table.name).cloned();
        if let Some((0, failure)) = &failure {
            return Err(failure.to_error());
        }

        let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let limit = trailing_limit(sql).unwrap_or(usize::MAX);
        let rows = table
            .rows
            .iter()
            .take(limit)
            .map(|values| Row::new(names.clone(), values.clone()))
            .collect();

        Ok(Box::pin(MockRowStream {
            rows,
            yielded: 0,
            fail_after: failure,
        }))
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.ensure_open()?;
        self.db
            .state
            .lock()
            .session_calls
            .push(SessionCall::ReadOnly(read_only));
        Ok(())
    }

    async fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.ensure_open()?;
        self.db
            .state
            .lock()
            .session_calls
            .push(SessionCall::Catalog(catalog.to_string()));
        Ok(())
    }

    async fn set_schema(&self, schema: &str) -> Result<()> {
        self.ensure_open()?;
        self.db
            .state
            .lock()
            .session_calls
            .push(SessionCall::Schema(schema.to_string()));
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<TableName>> {
        self.ensure_open()?;
        let state = self.db.state.lock();
        if let Some(failure) = &state.list_tables_failure {
            return Err(failure.to_error());
        }
        Ok(state.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn list_columns(&self, table: &TableName) -> Result<Vec<ColumnMetadata>> {
        self.ensure_open()?;
        let state = self.db.state.lock();
        if let Some(failure) = state.column_failures.get(table) {
            return Err(failure.to_error());
        }
        state
            .tables
            .iter()
            .find(|t| &t.name == table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| Error::TableNotFound {
                table: table.qualified_name(),
            })
    }

    fn database_type(&self) -> DatabaseType {
        self.db.state.lock().database_type
    }

    async fn is_valid(&self) -> bool {
        !*self.closed.lock()
    }

    async fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.db.state.lock().open_connections -= 1;
        }
        Ok(())
    }
}

struct MockRowStream {
    rows: VecDeque<Row>,
    yielded: usize,
    fail_after: Option<(usize, MockFailure)>,
}

impl RowStream for MockRowStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            if let Some((after, failure)) = &self.fail_after {
                if self.yielded >= *after {
                    return Err(failure.to_error());
                }
            }
            let row = self.rows.pop_front();
            if row.is_some() {
                self.yielded += 1;
            }
            Ok(row)
        })
    }
}

fn trailing_limit(sql: &str) -> Option<usize> {
    let upper = sql.to_ascii_uppercase();
    if let Some(idx) = upper.rfind(" LIMIT ") {
        return sql[idx + 7..].trim().parse().ok();
    }
    let idx = upper.rfind(" FETCH NEXT ")?;
    sql[idx + 12..].split_whitespace().next()?.parse().ok()
}
