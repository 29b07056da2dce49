//! End-to-end read tests against the in-memory database

use serde_json::{json, Value as JsonValue};
use sluice_connect::catalog::{ConfiguredCatalog, ConfiguredStream, Stream, StreamKey};
use sluice_connect::config::{DatabaseKind, SourceConfig};
use sluice_connect::protocol::StateType;
use sluice_connect::read::ReadOrchestrator;
use sluice_connect::sink::{MemorySink, MemoryValidationSink};
use sluice_connect::state::{InputState, InputStateParser};
use sluice_connect::ConnectorError;
use sluice_rdbc::testing::{MockConnectionFactory, MockDatabase, MockFailure, MockTable, SessionCall};
use sluice_rdbc::types::{ColumnMetadata, TableName, Value};
use std::sync::Arc;

fn orders_table() -> TableName {
    TableName::new("orders").with_schema("sales")
}

fn orders(ids: std::ops::RangeInclusive<i64>) -> MockTable {
    MockTable::new(orders_table())
        .column(ColumnMetadata::new("id", "int8").primary_key(1))
        .column(ColumnMetadata::new("note", "text"))
        .rows(ids.map(|id| vec![Value::Int64(id), Value::String(format!("order {}", id))]))
}

fn orders_stream() -> Stream {
    Stream::new(
        "orders",
        json!({"properties": {"id": {"type": "integer"}, "note": {"type": "string"}}}),
    )
    .namespace("sales")
}

fn incremental_catalog() -> ConfiguredCatalog {
    ConfiguredCatalog::new().add_stream(ConfiguredStream::incremental(
        orders_stream(),
        vec!["id".into()],
    ))
}

fn scenario_b_state() -> InputState {
    InputStateParser::parse_json(
        r#"[{"type":"STREAM","stream":{"descriptor":{"name":"orders","namespace":"sales"},"state":{"id":"100"}}}]"#,
    )
    .unwrap()
}

fn orchestrator(db: &MockDatabase, config: SourceConfig) -> ReadOrchestrator {
    ReadOrchestrator::new(config, Arc::new(MockConnectionFactory::new(db.clone())))
}

fn states(out: &MemorySink) -> Vec<JsonValue> {
    out.states()
        .into_iter()
        .map(|s| serde_json::to_value(s).unwrap())
        .collect()
}

#[tokio::test]
async fn test_incremental_resume_emits_final_checkpoint() {
    // the mock returns scripted rows as-is, so only rows after the cursor are scripted
    let db = MockDatabase::new().with_table(orders(101..=150));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, SourceConfig::new("mock://shop"))
        .read(&incremental_catalog(), &scenario_b_state(), &mut out, &mut failures)
        .await
        .unwrap();

    let key = StreamKey::new("orders").with_namespace("sales");
    assert_eq!(summary.records.get(&key), Some(&50));
    assert!(failures.is_empty());

    let records = out.records();
    assert_eq!(records.len(), 50);
    assert_eq!(records[0].stream, "orders");
    assert_eq!(records[0].namespace.as_deref(), Some("sales"));
    assert_eq!(records[0].data["id"], json!(101));
    assert_eq!(records[0].data["note"], json!("order 101"));

    let states = states(&out);
    assert_eq!(states.len(), 1);
    assert_eq!(
        states[0],
        json!({
            "type": "STREAM",
            "stream": {"descriptor": {"name": "orders", "namespace": "sales"}, "state": {"id": "150"}},
            "sourceStats": {"recordCount": 50}
        })
    );

    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(
        executed[0].sql,
        "SELECT \"id\", \"note\" FROM \"sales\".\"orders\" WHERE (\"id\" > $1) ORDER BY \"id\" ASC"
    );
    assert_eq!(executed[0].params, vec![Value::Int64(100)]);

    assert_eq!(db.open_connections(), 0);
    let calls = db.session_calls();
    assert!(calls.contains(&SessionCall::ReadOnly(true)));
    assert!(calls.contains(&SessionCall::Schema("sales".into())));
}

#[tokio::test]
async fn test_checkpoints_every_interval() {
    let db = MockDatabase::new().with_table(orders(1..=45));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, SourceConfig::new("mock://shop").with_checkpoint_interval(20))
        .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    assert_eq!(summary.checkpoints, 3);
    let cursors: Vec<JsonValue> = states(&out)
        .iter()
        .map(|s| s["stream"]["state"].clone())
        .collect();
    assert_eq!(
        cursors,
        vec![json!({"id": "20"}), json!({"id": "40"}), json!({"id": "45"})]
    );
    // first sync has nothing to resume from
    assert!(!db.executed()[0].sql.contains("WHERE"));
}

#[tokio::test]
async fn test_failure_mid_stream_keeps_last_checkpoint_and_closes() {
    let db = MockDatabase::new()
        .with_table(orders(1..=45))
        .fail_query_after(orders_table(), 30, MockFailure::connection("connection reset"));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let result = orchestrator(&db, SourceConfig::new("mock://shop").with_checkpoint_interval(20))
        .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(out.records().len(), 30);
    let states = states(&out);
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["stream"]["state"], json!({"id": "20"}));
    assert_eq!(db.open_connections(), 0);
    assert_eq!(db.total_connections(), 2);
}

#[tokio::test]
async fn test_state_type_mismatch_is_config_error() {
    let db = MockDatabase::new().with_table(orders(101..=150));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let err = orchestrator(
        &db,
        SourceConfig::new("mock://shop").with_expected_state_type(StateType::Global),
    )
    .read(&incremental_catalog(), &scenario_b_state(), &mut out, &mut failures)
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectorError::Config(_)));
    assert!(out.messages().is_empty());
    assert_eq!(db.total_connections(), 0);
}

#[tokio::test]
async fn test_incompatible_value_aborts_with_data_error() {
    let table = MockTable::new(orders_table())
        .column(ColumnMetadata::new("id", "int8").primary_key(1))
        .column(ColumnMetadata::new("note", "text"))
        .row(vec![Value::String("not a number".into()), Value::Null]);
    let db = MockDatabase::new().with_table(table);
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let err = orchestrator(&db, SourceConfig::new("mock://shop"))
        .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap_err();

    match err {
        ConnectorError::Rdbc(sluice_rdbc::Error::Data { column, .. }) => assert_eq!(column, "id"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(out.records().is_empty());
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_missing_table_does_not_stop_other_streams() {
    let db = MockDatabase::new().with_table(orders(1..=3));
    let catalog = incremental_catalog().add_stream(ConfiguredStream::new(
        Stream::new("refunds", json!({"properties": {"id": {"type": "integer"}}})).namespace("sales"),
    ));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, SourceConfig::new("mock://shop"))
        .read(&catalog, &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    assert_eq!(summary.total_records(), 3);
    assert_eq!(failures.failures().len(), 1);
    assert_eq!(failures.failures()[0].stream().name, "refunds");
}

#[tokio::test]
async fn test_global_initial_load_completes_snapshot() {
    let db = MockDatabase::new().with_table(orders(1..=5));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(
        &db,
        SourceConfig::new("mock://shop")
            .with_expected_state_type(StateType::Global)
            .with_checkpoint_interval(2),
    )
    .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
    .await
    .unwrap();

    assert_eq!(summary.total_records(), 5);
    let states = states(&out);
    assert_eq!(states.len(), 3);
    assert_eq!(states[0]["type"], "GLOBAL");
    assert_eq!(
        states[1]["global"]["streamStates"][0]["state"],
        json!({"state_type": "primary_key", "pk_name": "id", "pk_val": "4", "ordinal": 4})
    );
    assert_eq!(
        states[2],
        json!({
            "type": "GLOBAL",
            "global": {
                "sharedState": null,
                "streamStates": [{
                    "descriptor": {"name": "orders", "namespace": "sales"},
                    "state": {"stream_name": "orders", "stream_namespace": "sales", "cursor_field": [], "cursor": null}
                }]
            },
            "sourceStats": {"recordCount": 5}
        })
    );
    assert!(db.executed()[0].sql.ends_with("ORDER BY \"id\" ASC"));
}

#[tokio::test]
async fn test_global_resume_and_skip() {
    let customers = MockTable::new(TableName::new("customers").with_schema("sales"))
        .column(ColumnMetadata::new("id", "int8").primary_key(1))
        .row(vec![Value::Int64(1)]);
    let db = MockDatabase::new()
        .with_table(orders(41..=42))
        .with_table(customers);
    let catalog = incremental_catalog().add_stream(ConfiguredStream::incremental(
        Stream::new("customers", json!({"properties": {"id": {"type": "integer"}}})).namespace("sales"),
        vec!["id".into()],
    ));
    let state = InputStateParser::parse_json(
        &json!([{
            "type": "GLOBAL",
            "global": {
                "sharedState": {"lsn": "0/16B3748"},
                "streamStates": [
                    {"descriptor": {"name": "orders", "namespace": "sales"},
                     "state": {"state_type": "primary_key", "pk_name": "id", "pk_val": "40", "ordinal": 40}},
                    {"descriptor": {"name": "customers", "namespace": "sales"},
                     "state": {"stream_name": "customers", "stream_namespace": "sales", "cursor_field": [], "cursor": null}}
                ]
            }
        }])
        .to_string(),
    )
    .unwrap();
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(
        &db,
        SourceConfig::new("mock://shop").with_expected_state_type(StateType::Global),
    )
    .read(&catalog, &state, &mut out, &mut failures)
    .await
    .unwrap();

    assert_eq!(
        summary.skipped,
        vec![StreamKey::new("customers").with_namespace("sales")]
    );
    let executed = db.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].sql.contains("WHERE (\"id\" > $1)"));
    assert_eq!(executed[0].params, vec![Value::Int64(40)]);

    let last = states(&out).pop().unwrap();
    assert_eq!(last["global"]["sharedState"], json!({"lsn": "0/16B3748"}));
    assert_eq!(last["global"]["streamStates"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_full_refresh_checkpoints_by_primary_key() {
    let db = MockDatabase::new().with_table(orders(1..=5));
    let catalog = ConfiguredCatalog::new().add_stream(ConfiguredStream::new(orders_stream()));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    orchestrator(
        &db,
        SourceConfig::new("mock://shop")
            .with_checkpoint_interval(3)
            .with_max_rows_per_stream(10),
    )
    .read(&catalog, &InputState::Empty, &mut out, &mut failures)
    .await
    .unwrap();

    let states = states(&out);
    assert_eq!(states.len(), 2);
    assert_eq!(states[0]["stream"]["state"]["pk_val"], "3");
    assert_eq!(states[0]["stream"]["state"]["ordinal"], 3);
    // a finished full refresh has nothing to resume
    assert_eq!(states[1]["stream"]["state"], json!({}));
    assert_eq!(states[1]["sourceStats"]["recordCount"], 5);
    assert!(db.executed()[0].sql.ends_with("ORDER BY \"id\" ASC LIMIT 10"));
}

#[tokio::test]
async fn test_row_limit_leaves_snapshot_resumable() {
    let config = SourceConfig::new("mock://shop")
        .with_expected_state_type(StateType::Global)
        .with_max_rows_per_stream(3);
    let db = MockDatabase::new().with_table(orders(1..=5));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, config.clone())
        .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    assert_eq!(summary.total_records(), 3);
    let page = states(&out).pop().unwrap();
    assert_eq!(
        page["global"]["streamStates"][0]["state"],
        json!({"state_type": "primary_key", "pk_name": "id", "pk_val": "3", "ordinal": 3})
    );
    assert_eq!(page["sourceStats"]["recordCount"], 3);

    // the mock does not evaluate WHERE, so the remaining rows are scripted directly
    let rest = MockDatabase::new().with_table(orders(4..=5));
    let prior = InputStateParser::parse(&[page]).unwrap();
    let mut out = MemorySink::new();

    let summary = orchestrator(&rest, config)
        .read(&incremental_catalog(), &prior, &mut out, &mut failures)
        .await
        .unwrap();

    assert!(summary.skipped.is_empty());
    assert_eq!(summary.total_records(), 2);
    assert_eq!(rest.executed()[0].params, vec![Value::Int64(3)]);
    let last = states(&out).pop().unwrap();
    assert_eq!(
        last["global"]["streamStates"][0]["state"],
        json!({"stream_name": "orders", "stream_namespace": "sales", "cursor_field": [], "cursor": null})
    );
}

#[tokio::test]
async fn test_full_refresh_page_keeps_primary_key_progress() {
    let db = MockDatabase::new().with_table(orders(1..=5));
    let catalog = ConfiguredCatalog::new().add_stream(ConfiguredStream::new(orders_stream()));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    orchestrator(&db, SourceConfig::new("mock://shop").with_max_rows_per_stream(2))
        .read(&catalog, &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    let states = states(&out);
    assert_eq!(states.len(), 1);
    assert_eq!(
        states[0]["stream"]["state"],
        json!({"state_type": "primary_key", "pk_name": "id", "pk_val": "2", "ordinal": 2})
    );
    assert_eq!(states[0]["sourceStats"]["recordCount"], 2);
}

#[tokio::test]
async fn test_unreadable_table_skips_only_its_stream() {
    let refunds_table = TableName::new("refunds").with_schema("sales");
    let db = MockDatabase::new()
        .with_table(orders(1..=3))
        .with_table(MockTable::new(refunds_table.clone()).column(ColumnMetadata::new("id", "int8")))
        .fail_columns_for(refunds_table, MockFailure::driver("42501", 1142, "denied"));
    let catalog = incremental_catalog().add_stream(ConfiguredStream::new(
        Stream::new("refunds", json!({"properties": {"id": {"type": "integer"}}})).namespace("sales"),
    ));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, SourceConfig::new("mock://shop"))
        .read(&catalog, &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    assert_eq!(summary.total_records(), 3);
    assert_eq!(failures.failures().len(), 1);
    assert_eq!(failures.failures()[0].stream().name, "refunds");
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_configured_schema_scopes_discovery() {
    let archive = MockTable::new(TableName::new("orders").with_schema("archive"))
        .column(ColumnMetadata::new("id", "int8").primary_key(1))
        .column(ColumnMetadata::new("note", "text"));
    let db = MockDatabase::new().with_table(archive).with_table(orders(1..=2));
    let catalog = ConfiguredCatalog::new().add_stream(ConfiguredStream::incremental(
        Stream::new(
            "orders",
            json!({"properties": {"id": {"type": "integer"}, "note": {"type": "string"}}}),
        ),
        vec!["id".into()],
    ));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let summary = orchestrator(&db, SourceConfig::new("mock://shop").with_schema("sales"))
        .read(&catalog, &InputState::Empty, &mut out, &mut failures)
        .await
        .unwrap();

    assert!(failures.is_empty(), "{:?}", failures.failures());
    assert_eq!(summary.total_records(), 2);
    assert!(db.executed()[0].sql.contains("FROM \"sales\".\"orders\""));
}

#[tokio::test]
async fn test_database_type_mismatch_is_config_error() {
    let db = MockDatabase::new().with_table(orders(1..=2));
    let mut out = MemorySink::new();
    let mut failures = MemoryValidationSink::new();

    let err = orchestrator(
        &db,
        SourceConfig::new("mock://shop").with_database_type(DatabaseKind::SqlServer),
    )
    .read(&incremental_catalog(), &InputState::Empty, &mut out, &mut failures)
    .await
    .unwrap_err();

    assert!(matches!(err, ConnectorError::Config(_)));
    assert_eq!(db.total_connections(), 0);
}
