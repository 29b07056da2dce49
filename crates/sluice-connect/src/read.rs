//! Read orchestration
//!
//! One invocation reads every planned stream in sequence:
//!
//! ```text
//! Init -> ValidatingState -> Planning
//!      -> (Connecting -> Querying -> StreamingRows -> Checkpointing)*
//!      -> Done
//! ```
//!
//! with `Failed` reachable from every phase. A failure aborts the whole
//! invocation without retry; the last emitted checkpoint stays authoritative.
//! Every connection and metadata session is closed on every exit path.

use serde_json::{Map, Value as JsonValue};
use sluice_rdbc::connection::{Connection, ConnectionFactory};
use sluice_rdbc::mapping::map_column;
use sluice_rdbc::metadata::MetadataSession;
use sluice_rdbc::types::{ColumnMetadata, Row, TableName};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::catalog::{ConfiguredCatalog, StreamKey};
use crate::config::SourceConfig;
use crate::error::{ConnectorError, Result};
use crate::protocol::Message;
use crate::query::SelectQueryBuilder;
use crate::reconcile::{CatalogReconciler, SelectPlan};
use crate::sink::{MessageSink, ValidationSink};
use crate::state::{
    CheckpointStateManager, CursorAccumulator, CursorValues, InputState, PrimaryKeyLoadStatus,
    ReadStrategy,
};

/// Phase of a read invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing done yet
    Init,
    /// Checking prior state against the configuration
    ValidatingState,
    /// Discovering metadata and reconciling the catalog
    Planning,
    /// Opening a stream's connection
    Connecting,
    /// Running a stream's query
    Querying,
    /// Forwarding a stream's rows
    StreamingRows,
    /// Emitting a checkpoint
    Checkpointing,
    /// All streams read
    Done,
    /// Aborted
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::ValidatingState => "validating_state",
            Self::Planning => "planning",
            Self::Connecting => "connecting",
            Self::Querying => "querying",
            Self::StreamingRows => "streaming_rows",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Records emitted per stream
    pub records: BTreeMap<StreamKey, u64>,
    /// Streams not read because their snapshot is complete
    pub skipped: Vec<StreamKey>,
    /// Checkpoints emitted
    pub checkpoints: u64,
}

impl ReadSummary {
    /// Records emitted across all streams
    pub fn total_records(&self) -> u64 {
        self.records.values().sum()
    }
}

/// Drives a full read invocation
pub struct ReadOrchestrator {
    config: SourceConfig,
    factory: Arc<dyn ConnectionFactory>,
}

struct Progress {
    phase: SyncPhase,
    checkpoints: u64,
}

impl Progress {
    fn enter(&mut self, phase: SyncPhase) {
        debug!(from = %self.phase, to = %phase, "Sync phase");
        self.phase = phase;
    }
}

impl ReadOrchestrator {
    /// Orchestrator over a connection factory
    pub fn new(config: SourceConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { config, factory }
    }

    /// Read every configured stream, emitting records and checkpoints to `out`
    pub async fn read(
        &self,
        catalog: &ConfiguredCatalog,
        state: &InputState,
        out: &mut dyn MessageSink,
        failures: &mut dyn ValidationSink,
    ) -> Result<ReadSummary> {
        let mut progress = Progress {
            phase: SyncPhase::Init,
            checkpoints: 0,
        };
        match self.run(catalog, state, out, failures, &mut progress).await {
            Ok(summary) => {
                progress.enter(SyncPhase::Done);
                info!(
                    records = summary.total_records(),
                    streams = summary.records.len(),
                    skipped = summary.skipped.len(),
                    checkpoints = summary.checkpoints,
                    "Read complete"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(phase = %progress.phase, error = %e, "Read failed");
                progress.enter(SyncPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        catalog: &ConfiguredCatalog,
        state: &InputState,
        out: &mut dyn MessageSink,
        failures: &mut dyn ValidationSink,
        progress: &mut Progress,
    ) -> Result<ReadSummary> {
        progress.enter(SyncPhase::ValidatingState);
        let expected = self.config.expected_state_type;
        if let Some(actual) = state.state_type() {
            if actual != expected {
                return Err(ConnectorError::config(format!(
                    "prior state is {} but the configuration expects {}",
                    actual, expected
                )));
            }
        }

        self.config.verify_database_type(self.factory.database_type())?;

        progress.enter(SyncPhase::Planning);
        let (tables, columns) = self.discover(catalog).await?;
        let plans = CatalogReconciler::reconcile(&catalog.streams, &tables, &columns, failures);
        let mut manager = CheckpointStateManager::seed(expected, state, catalog);

        let mut summary = ReadSummary::default();
        for plan in plans {
            let strategy = manager.read_strategy(&plan.stream, &plan.primary_key)?;
            if strategy == ReadStrategy::Skip {
                info!(stream = %plan.stream, "Snapshot complete, skipping stream");
                summary.skipped.push(plan.stream.clone());
                continue;
            }
            let plan = self.finalise(plan, strategy, &manager)?;
            let records = self
                .read_stream(&plan, strategy, &mut manager, out, progress)
                .await?;
            summary.records.insert(plan.stream.clone(), records);
        }
        summary.checkpoints = progress.checkpoints;
        Ok(summary)
    }

    async fn discover(
        &self,
        catalog: &ConfiguredCatalog,
    ) -> Result<(Vec<TableName>, HashMap<TableName, Vec<ColumnMetadata>>)> {
        let config = self.config.connection_config();
        let session = within_connect_timeout(
            self.config.connection.connect_timeout_ms,
            MetadataSession::open(self.factory.as_ref(), &config),
        )
        .await?;
        let discovered = self.discover_with(&session, catalog).await;
        let closed = session.close().await;
        let discovered = discovered?;
        closed?;
        Ok(discovered)
    }

    async fn discover_with(
        &self,
        session: &MetadataSession,
        catalog: &ConfiguredCatalog,
    ) -> Result<(Vec<TableName>, HashMap<TableName, Vec<ColumnMetadata>>)> {
        let names: HashSet<&str> = catalog
            .streams
            .iter()
            .map(|s| s.stream.name.as_str())
            .collect();
        let tables: Vec<TableName> = session
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| names.contains(t.name.as_str()) && self.config.in_scope(t))
            .collect();
        // unreadable tables are left out so only their streams report a missing table
        let discovered = session.columns_for(&tables).await?;
        let readable = discovered.readable(&tables).cloned().collect();
        Ok((readable, discovered.columns))
    }

    /// Fix ordering, resume position and limit for the chosen strategy
    fn finalise(
        &self,
        plan: SelectPlan,
        strategy: ReadStrategy,
        manager: &CheckpointStateManager,
    ) -> Result<SelectPlan> {
        let limit = self.config.max_rows_per_stream;
        let key = plan.stream.clone();
        Ok(match strategy {
            ReadStrategy::Cursor => {
                if plan.cursor_columns.is_empty() {
                    return Err(ConnectorError::config(format!(
                        "incremental stream {} has no cursor field",
                        key
                    )));
                }
                let order = plan.cursor_columns.clone();
                let after = manager.resume_cursor(&key).cloned().unwrap_or_default();
                plan.with_resume(order, after, limit)
            }
            ReadStrategy::PrimaryKeyLoad => {
                let pk = plan.primary_key[0].clone();
                let after = manager
                    .primary_key_status(&key)
                    .filter(|s| s.pk_name == pk)
                    .map(|s| CursorValues::single(pk.clone(), s.pk_val.clone()))
                    .unwrap_or_default();
                plan.with_resume(vec![pk], after, limit)
            }
            ReadStrategy::FullScan => {
                let order = plan.primary_key.clone();
                plan.with_resume(order, CursorValues::new(), limit)
            }
            ReadStrategy::Skip => plan,
        })
    }

    async fn read_stream(
        &self,
        plan: &SelectPlan,
        strategy: ReadStrategy,
        manager: &mut CheckpointStateManager,
        out: &mut dyn MessageSink,
        progress: &mut Progress,
    ) -> Result<u64> {
        if plan.columns.is_empty() && plan.cursor_columns.is_empty() {
            warn!(stream = %plan.stream, "No columns selected, emitting final state only");
            let message = manager.final_state_for(&plan.stream, 0)?;
            out.accept(&Message::state(message))?;
            progress.checkpoints += 1;
            return Ok(0);
        }

        progress.enter(SyncPhase::Connecting);
        let config = self.config.connection_config();
        let conn = within_connect_timeout(
            self.config.connection.connect_timeout_ms,
            self.factory.connect(&config),
        )
        .await?;
        let result = self
            .stream_rows(conn.as_ref(), plan, strategy, manager, out, progress)
            .await;
        let closed = conn.close().await;
        let records = result?;
        closed?;
        Ok(records)
    }

    async fn stream_rows(
        &self,
        conn: &dyn Connection,
        plan: &SelectPlan,
        strategy: ReadStrategy,
        manager: &mut CheckpointStateManager,
        out: &mut dyn MessageSink,
        progress: &mut Progress,
    ) -> Result<u64> {
        conn.set_read_only(true).await?;
        if let Some(catalog) = &plan.table.catalog {
            conn.set_catalog(catalog).await?;
        }
        if let Some(schema) = &plan.table.schema {
            conn.set_schema(schema).await?;
        }

        progress.enter(SyncPhase::Querying);
        let dialect = conn.dialect();
        let (sql, params) = SelectQueryBuilder::new(plan, dialect.as_ref()).build()?;
        debug!(stream = %plan.stream, sql = %sql, params = params.len(), "Querying stream");
        let mut rows = conn.query_stream(&sql, &params).await?;

        progress.enter(SyncPhase::StreamingRows);
        let base_ordinal = manager
            .primary_key_status(&plan.stream)
            .map(|s| s.ordinal)
            .unwrap_or(0);
        let mut acc = CursorAccumulator::new(plan.cursor_columns.clone(), plan.cursor_values.clone());
        let interval = self.config.checkpoint_interval.max(1);

        while let Some(row) = rows.next().await? {
            acc.observe(&row);
            let data = map_row(plan, &row)?;
            out.accept(&Message::record(&plan.stream, data))?;

            if strategy != ReadStrategy::FullScan && acc.rows() % interval == 0 {
                progress.enter(SyncPhase::Checkpointing);
                push_progress(manager, plan, strategy, &acc, base_ordinal)?;
                out.accept(&Message::state(manager.checkpoint_at(&plan.stream)?))?;
                progress.checkpoints += 1;
                progress.enter(SyncPhase::StreamingRows);
            }
        }

        progress.enter(SyncPhase::Checkpointing);
        if plan.limit.is_some_and(|limit| acc.rows() >= limit) {
            // a full page may have left rows behind; the stream continues next sync
            if strategy == ReadStrategy::FullScan {
                warn!(
                    stream = %plan.stream,
                    records = acc.rows(),
                    "Row limit reached on a stream without a resumable order, next sync starts over"
                );
            }
            push_progress(manager, plan, strategy, &acc, base_ordinal)?;
            let message = manager
                .checkpoint_at(&plan.stream)?
                .with_record_count(acc.rows());
            out.accept(&Message::state(message))?;
            progress.checkpoints += 1;
            info!(stream = %plan.stream, records = acc.rows(), "Read one page of stream");
            return Ok(acc.rows());
        }
        if strategy == ReadStrategy::Cursor {
            push_progress(manager, plan, strategy, &acc, base_ordinal)?;
        }
        let message = manager.final_state_for(&plan.stream, acc.rows())?;
        out.accept(&Message::state(message))?;
        progress.checkpoints += 1;
        info!(stream = %plan.stream, records = acc.rows(), "Read stream");
        Ok(acc.rows())
    }
}

/// Bound connection establishment by the configured timeout
pub(crate) async fn within_connect_timeout<T, F>(timeout_ms: u64, connect: F) -> Result<T>
where
    F: Future<Output = sluice_rdbc::Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), connect).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(sluice_rdbc::Error::timeout(format!(
            "no connection within {}ms",
            timeout_ms
        ))
        .into()),
    }
}

/// Hand the accumulator's position to the manager
fn push_progress(
    manager: &mut CheckpointStateManager,
    plan: &SelectPlan,
    strategy: ReadStrategy,
    acc: &CursorAccumulator,
    base_ordinal: u64,
) -> Result<()> {
    match strategy {
        ReadStrategy::Cursor => {
            if !acc.values().is_empty() {
                manager.update_cursor(&plan.stream, acc.values().clone())?;
            }
        }
        ReadStrategy::PrimaryKeyLoad => {
            let pk = &acc.columns()[0];
            if let Some(last) = acc.values().get(pk) {
                let status = PrimaryKeyLoadStatus::new(pk.clone(), last, base_ordinal + acc.rows());
                manager.update_primary_key_load(&plan.stream, status)?;
            }
        }
        ReadStrategy::FullScan | ReadStrategy::Skip => {}
    }
    Ok(())
}

/// Map the plan's data columns of one row
fn map_row(plan: &SelectPlan, row: &Row) -> Result<Map<String, JsonValue>> {
    let mut data = Map::with_capacity(plan.columns.len());
    for column in &plan.columns {
        let value = row
            .get_by_name(&column.name)
            .cloned()
            .unwrap_or(sluice_rdbc::Value::Null);
        let mapped = map_column(&column.name, &value, &column.logical_type)?;
        data.insert(column.name.clone(), mapped);
    }
    Ok(data)
}
