//! Tests for checkpoint tracking and rendering

use serde_json::{json, Value};
use sluice_connect::catalog::{ConfiguredCatalog, ConfiguredStream, Stream, StreamKey};
use sluice_connect::protocol::StateType;
use sluice_connect::state::{
    CheckpointStateManager, CursorValues, InputStateParser, PrimaryKeyLoadStatus, ReadStrategy,
};

fn key(name: &str) -> StreamKey {
    StreamKey::new(name).with_namespace("sales")
}

fn stream(name: &str) -> Stream {
    Stream::new(name, json!({"properties": {"id": {"type": "integer"}}})).namespace("sales")
}

fn catalog() -> ConfiguredCatalog {
    ConfiguredCatalog::new()
        .add_stream(ConfiguredStream::incremental(stream("orders"), vec!["id".into()]))
        .add_stream(ConfiguredStream::incremental(stream("customers"), vec!["id".into()]))
        .add_stream(ConfiguredStream::incremental(stream("audit_log"), vec!["id".into()]))
}

fn global_state() -> Value {
    json!([
        {
            "type": "GLOBAL",
            "global": {
                "sharedState": {"lsn": "0/16B3748"},
                "streamStates": [
                    {
                        "descriptor": {"name": "orders", "namespace": "sales"},
                        "state": {"state_type": "primary_key", "pk_name": "id", "pk_val": "40", "ordinal": 40}
                    },
                    {
                        "descriptor": {"name": "customers", "namespace": "sales"},
                        "state": {"stream_name": "customers", "stream_namespace": "sales", "cursor_field": [], "cursor": null}
                    }
                ]
            }
        },
        {
            "type": "STREAM",
            "stream": {"descriptor": {"name": "audit_log", "namespace": "sales"}, "state": {"id": "12"}}
        }
    ])
}

fn seeded() -> CheckpointStateManager {
    let input = InputStateParser::parse(global_state().as_array().unwrap()).unwrap();
    CheckpointStateManager::seed(StateType::Global, &input, &catalog())
}

fn sub_state<'a>(message: &'a Value, name: &str) -> Option<&'a Value> {
    message["global"]["streamStates"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["descriptor"]["name"] == name)
        .map(|s| &s["state"])
}

#[test]
fn test_global_seed_assigns_strategies() {
    let manager = seeded();
    let pk = vec!["id".to_string()];

    assert_eq!(
        manager.read_strategy(&key("orders"), &pk).unwrap(),
        ReadStrategy::PrimaryKeyLoad
    );
    assert_eq!(
        manager.read_strategy(&key("customers"), &pk).unwrap(),
        ReadStrategy::Skip
    );
    assert_eq!(
        manager.read_strategy(&key("audit_log"), &pk).unwrap(),
        ReadStrategy::Cursor
    );
    assert_eq!(
        manager.resume_cursor(&key("audit_log")),
        Some(&CursorValues::single("id", "12"))
    );
    assert_eq!(manager.primary_key_status(&key("orders")).unwrap().ordinal, 40);
    assert!(manager.is_snapshot_complete(&key("customers")));
}

#[test]
fn test_untouched_streams_round_trip() {
    let mut manager = seeded();
    manager
        .update_primary_key_load(&key("orders"), PrimaryKeyLoadStatus::new("id", "55", 55))
        .unwrap();

    let message = serde_json::to_value(manager.checkpoint_at(&key("orders")).unwrap()).unwrap();
    assert_eq!(message["type"], "GLOBAL");
    assert_eq!(message["global"]["sharedState"], json!({"lsn": "0/16B3748"}));
    assert_eq!(sub_state(&message, "orders").unwrap()["pk_val"], "55");
    // untouched prior sub-state is echoed verbatim
    assert_eq!(
        sub_state(&message, "customers").unwrap(),
        &global_state()[0]["global"]["streamStates"][1]["state"]
    );
    // independent streams stay out of the shared checkpoint
    assert!(sub_state(&message, "audit_log").is_none());
}

#[test]
fn test_primary_key_progress_is_monotonic() {
    let mut manager = seeded();
    assert!(manager
        .update_primary_key_load(&key("orders"), PrimaryKeyLoadStatus::new("id", "60", 60))
        .unwrap());
    assert!(!manager
        .update_primary_key_load(&key("orders"), PrimaryKeyLoadStatus::new("id", "45", 45))
        .unwrap());
    assert_eq!(manager.primary_key_status(&key("orders")).unwrap().pk_val, "60");
}

#[test]
fn test_cursor_progress_is_monotonic() {
    let mut manager = seeded();
    assert!(manager
        .update_cursor(&key("audit_log"), CursorValues::single("id", "20"))
        .unwrap());
    // numeric comparison, not lexical
    assert!(!manager
        .update_cursor(&key("audit_log"), CursorValues::single("id", "9"))
        .unwrap());
    assert_eq!(
        manager.resume_cursor(&key("audit_log")),
        Some(&CursorValues::single("id", "20"))
    );
}

#[test]
fn test_final_state_completes_initial_load() {
    let mut manager = seeded();
    manager
        .update_primary_key_load(&key("orders"), PrimaryKeyLoadStatus::new("id", "90", 90))
        .unwrap();
    let message = serde_json::to_value(manager.final_state_for(&key("orders"), 50).unwrap()).unwrap();

    assert_eq!(message["sourceStats"]["recordCount"], 50);
    assert_eq!(
        sub_state(&message, "orders").unwrap(),
        &json!({
            "stream_name": "orders",
            "stream_namespace": "sales",
            "cursor_field": [],
            "cursor": null
        })
    );
    assert!(manager.is_snapshot_complete(&key("orders")));
}

#[test]
fn test_independent_stream_checkpoints_as_stream() {
    let mut manager = seeded();
    manager
        .update_cursor(&key("audit_log"), CursorValues::single("id", "30"))
        .unwrap();
    let message = serde_json::to_value(manager.final_state_for(&key("audit_log"), 18).unwrap()).unwrap();
    assert_eq!(
        message,
        json!({
            "type": "STREAM",
            "stream": {"descriptor": {"name": "audit_log", "namespace": "sales"}, "state": {"id": "30"}},
            "sourceStats": {"recordCount": 18}
        })
    );
}

#[test]
fn test_shared_state_update_in_global_mode() {
    let mut manager = seeded();
    manager
        .update_shared_state(json!({"lsn": "0/16B4000"}))
        .unwrap();
    let message = serde_json::to_value(manager.checkpoint_at(&key("orders")).unwrap()).unwrap();
    assert_eq!(message["global"]["sharedState"], json!({"lsn": "0/16B4000"}));
}

#[test]
fn test_fresh_global_sync_starts_initial_load() {
    let input = InputStateParser::parse(&[]).unwrap();
    let manager = CheckpointStateManager::seed(StateType::Global, &input, &catalog());
    assert_eq!(
        manager
            .read_strategy(&key("orders"), &["id".to_string()])
            .unwrap(),
        ReadStrategy::PrimaryKeyLoad
    );
    // composite keys cannot resume by key
    assert_eq!(
        manager
            .read_strategy(&key("orders"), &["id".to_string(), "line".to_string()])
            .unwrap(),
        ReadStrategy::FullScan
    );
    assert_eq!(manager.shared_state(), Some(&Value::Null));
}
