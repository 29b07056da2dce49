//! Checkpoint state manager
//!
//! Single owner of resumable progress for one sync. Seeded from the parsed
//! [`InputState`] and the configured catalog, updated by the read loop, and
//! rendered back into [`StateMessage`]s on demand.
//!
//! Each configured stream is in one of four phases:
//!
//! | phase | meaning | rendered as |
//! |---|---|---|
//! | cursor | incremental stream resumed by cursor value | cursor values object |
//! | initial load | incremental stream still snapshotting (global mode) | primary key status |
//! | snapshot complete | incremental stream fed by CDC from now on | terminal state |
//! | full refresh | full-refresh stream, resumable by primary key | primary key status |
//!
//! Progress never regresses: updates comparing lower than the tracked value
//! are rejected and logged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::cursor::{compare_cursor_values, CursorValues};
use super::input::InputState;
use crate::catalog::{ConfiguredCatalog, StreamKey, SyncMode};
use crate::error::{ConnectorError, Result};
use crate::protocol::{StateMessage, StateType, StreamStateEntry};

/// Discriminator of a primary key load payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrimaryKeyStateType {
    /// Always `primary_key`
    #[default]
    #[serde(rename = "primary_key")]
    PrimaryKey,
}

/// Progress of a primary-key ordered load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyLoadStatus {
    /// Always `primary_key`
    #[serde(default)]
    pub state_type: PrimaryKeyStateType,
    /// Primary key column
    pub pk_name: String,
    /// Last primary key value read
    pub pk_val: String,
    /// Rows read so far, across attempts
    pub ordinal: u64,
    /// Cursor state to continue with once the load completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incremental_state: Option<Value>,
}

impl PrimaryKeyLoadStatus {
    /// Status after reading `ordinal` rows, the last one keyed `pk_val`
    pub fn new(pk_name: impl Into<String>, pk_val: impl Into<String>, ordinal: u64) -> Self {
        Self {
            state_type: PrimaryKeyStateType::PrimaryKey,
            pk_name: pk_name.into(),
            pk_val: pk_val.into(),
            ordinal,
            incremental_state: None,
        }
    }

    /// Attach the cursor state to hand over after the load
    pub fn with_incremental_state(mut self, state: Value) -> Self {
        self.incremental_state = Some(state);
        self
    }

    /// Recognise a primary key payload
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if payload.get("state_type").and_then(Value::as_str) != Some("primary_key") {
            return None;
        }
        serde_json::from_value(payload.clone()).ok()
    }

    fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// How the read loop should read a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Ordered by cursor columns, strictly after the resume cursor
    Cursor,
    /// Ordered by the single primary key column, strictly after the last key read
    PrimaryKeyLoad,
    /// Whole table, nothing to resume from
    FullScan,
    /// Nothing to read (snapshot already complete)
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Cursor(Option<CursorValues>),
    InitialLoad(Option<PrimaryKeyLoadStatus>),
    SnapshotComplete,
    FullRefresh(Option<PrimaryKeyLoadStatus>),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Cursor(_) => "cursor",
            Self::InitialLoad(_) => "initial_load",
            Self::SnapshotComplete => "snapshot_complete",
            Self::FullRefresh(_) => "full_refresh",
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedStream {
    cursor_columns: Vec<String>,
    phase: Phase,
    prior: Option<Value>,
    touched: bool,
    /// Tracked outside the shared state in global mode
    independent: bool,
}

impl TrackedStream {
    fn pk_status(&self) -> Option<&PrimaryKeyLoadStatus> {
        match &self.phase {
            Phase::InitialLoad(status) | Phase::FullRefresh(status) => status.as_ref(),
            _ => None,
        }
    }
}

/// Owner of all resumable progress of one sync
#[derive(Debug, Clone)]
pub struct CheckpointStateManager {
    state_type: StateType,
    shared: Option<Value>,
    streams: BTreeMap<StreamKey, TrackedStream>,
}

impl CheckpointStateManager {
    /// Seed progress for every configured stream from the prior state
    pub fn seed(state_type: StateType, input: &InputState, catalog: &ConfiguredCatalog) -> Self {
        let mut streams = BTreeMap::new();
        for configured in &catalog.streams {
            let key = configured.key();
            let prior = input.stream_payload(&key).cloned();
            let independent = state_type == StateType::Global && input.is_non_global(&key);
            let pk_status = prior.as_ref().and_then(PrimaryKeyLoadStatus::from_payload);

            let phase = match (configured.sync_mode, state_type) {
                (SyncMode::FullRefresh, _) => Phase::FullRefresh(pk_status),
                (SyncMode::Incremental, StateType::Stream) => {
                    Phase::Cursor(prior.as_ref().and_then(CursorValues::from_payload))
                }
                (SyncMode::Incremental, StateType::Global) if independent => {
                    Phase::Cursor(prior.as_ref().and_then(CursorValues::from_payload))
                }
                (SyncMode::Incremental, StateType::Global) => match (&prior, pk_status) {
                    (Some(_), Some(status)) => Phase::InitialLoad(Some(status)),
                    (Some(Value::Null), None) | (None, _) => Phase::InitialLoad(None),
                    (Some(_), None) => Phase::SnapshotComplete,
                },
            };
            debug!(stream = %key, phase = phase.name(), "Seeded stream progress");

            streams.insert(
                key,
                TrackedStream {
                    cursor_columns: configured.cursor_columns(),
                    phase,
                    prior,
                    touched: false,
                    independent,
                },
            );
        }

        let shared = match state_type {
            StateType::Global => Some(input.shared_state().cloned().unwrap_or(Value::Null)),
            StateType::Stream => None,
        };

        info!(
            state_type = %state_type,
            streams = streams.len(),
            "Seeded checkpoint state"
        );
        Self {
            state_type,
            shared,
            streams,
        }
    }

    /// State variant this manager renders
    pub fn state_type(&self) -> StateType {
        self.state_type
    }

    fn tracked(&self, key: &StreamKey) -> Result<&TrackedStream> {
        self.streams
            .get(key)
            .ok_or_else(|| ConnectorError::state(format!("stream {} is not configured", key)))
    }

    fn tracked_mut(&mut self, key: &StreamKey) -> Result<&mut TrackedStream> {
        self.streams
            .get_mut(key)
            .ok_or_else(|| ConnectorError::state(format!("stream {} is not configured", key)))
    }

    /// Replace a stream's primary key progress.
    ///
    /// Returns `false` (and keeps the tracked status) when the new status has a
    /// lower ordinal than the tracked one.
    pub fn update_primary_key_load(
        &mut self,
        key: &StreamKey,
        status: PrimaryKeyLoadStatus,
    ) -> Result<bool> {
        let tracked = self.tracked_mut(key)?;
        let slot = match &mut tracked.phase {
            Phase::InitialLoad(slot) | Phase::FullRefresh(slot) => slot,
            other => {
                return Err(ConnectorError::state(format!(
                    "stream {} in phase {} has no primary key progress",
                    key,
                    other.name()
                )))
            }
        };
        if let Some(current) = slot.as_ref() {
            if status.ordinal < current.ordinal {
                warn!(
                    stream = %key,
                    tracked = current.ordinal,
                    rejected = status.ordinal,
                    "Rejected primary key progress regression"
                );
                return Ok(false);
            }
        }
        *slot = Some(status);
        tracked.touched = true;
        Ok(true)
    }

    /// Replace a stream's cursor.
    ///
    /// Returns `false` (and keeps the tracked cursor) when the new values
    /// compare lower than the tracked ones.
    pub fn update_cursor(&mut self, key: &StreamKey, values: CursorValues) -> Result<bool> {
        let tracked = self.tracked_mut(key)?;
        let columns = tracked.cursor_columns.clone();
        let slot = match &mut tracked.phase {
            Phase::Cursor(slot) => slot,
            other => {
                return Err(ConnectorError::state(format!(
                    "stream {} in phase {} is not cursor based",
                    key,
                    other.name()
                )))
            }
        };
        if let Some(current) = slot.as_ref() {
            if compare_cursor_values(&values, current, &columns) == Ordering::Less {
                warn!(
                    stream = %key,
                    tracked = ?current,
                    rejected = ?values,
                    "Rejected cursor regression"
                );
                return Ok(false);
            }
        }
        *slot = Some(values);
        tracked.touched = true;
        Ok(true)
    }

    /// Replace the shared CDC payload
    pub fn update_shared_state(&mut self, shared: Value) -> Result<()> {
        match self.state_type {
            StateType::Global => {
                self.shared = Some(shared);
                Ok(())
            }
            StateType::Stream => Err(ConnectorError::state(
                "shared state requires GLOBAL checkpoints",
            )),
        }
    }

    /// Cursor to resume a cursor-based stream from
    pub fn resume_cursor(&self, key: &StreamKey) -> Option<&CursorValues> {
        match &self.streams.get(key)?.phase {
            Phase::Cursor(values) => values.as_ref(),
            _ => None,
        }
    }

    /// Primary key progress of a stream
    pub fn primary_key_status(&self, key: &StreamKey) -> Option<&PrimaryKeyLoadStatus> {
        self.streams.get(key)?.pk_status()
    }

    /// Shared CDC payload (global mode only)
    pub fn shared_state(&self) -> Option<&Value> {
        self.shared.as_ref()
    }

    /// Whether an incremental stream finished its snapshot
    pub fn is_snapshot_complete(&self, key: &StreamKey) -> bool {
        self.streams
            .get(key)
            .map(|t| t.phase == Phase::SnapshotComplete)
            .unwrap_or(false)
    }

    /// How to read a stream, given its discovered primary key
    pub fn read_strategy(&self, key: &StreamKey, primary_key: &[String]) -> Result<ReadStrategy> {
        let single_pk = primary_key.len() == 1;
        Ok(match &self.tracked(key)?.phase {
            Phase::Cursor(_) => ReadStrategy::Cursor,
            Phase::SnapshotComplete => ReadStrategy::Skip,
            Phase::InitialLoad(_) | Phase::FullRefresh(_) if single_pk => {
                ReadStrategy::PrimaryKeyLoad
            }
            Phase::InitialLoad(_) | Phase::FullRefresh(_) => ReadStrategy::FullScan,
        })
    }

    /// Mid-sync checkpoint for the stream currently being read
    pub fn checkpoint_at(&self, key: &StreamKey) -> Result<StateMessage> {
        let tracked = self.tracked(key)?;
        if self.state_type == StateType::Stream || tracked.independent {
            return Ok(StateMessage::stream(key, stream_payload(tracked)?));
        }
        self.global_message()
    }

    /// Mark a stream finished and render its final checkpoint
    pub fn final_state_for(&mut self, key: &StreamKey, record_count: u64) -> Result<StateMessage> {
        let state_type = self.state_type;
        let tracked = self.tracked_mut(key)?;
        match &tracked.phase {
            Phase::InitialLoad(_) => {
                tracked.phase = Phase::SnapshotComplete;
                tracked.touched = true;
            }
            Phase::FullRefresh(_) => {
                tracked.phase = Phase::FullRefresh(None);
                tracked.touched = true;
            }
            Phase::Cursor(_) | Phase::SnapshotComplete => {}
        }
        info!(
            stream = %key,
            records = record_count,
            phase = tracked.phase.name(),
            "Stream complete"
        );

        let independent = tracked.independent;
        let message = if state_type == StateType::Stream || independent {
            StateMessage::stream(key, stream_payload(self.tracked(key)?)?)
        } else {
            self.global_message()?
        };
        Ok(message.with_record_count(record_count))
    }

    fn global_message(&self) -> Result<StateMessage> {
        let mut stream_states = Vec::new();
        for (key, tracked) in self.streams.iter().filter(|(_, t)| !t.independent) {
            if let Some(state) = global_sub_state(key, tracked)? {
                stream_states.push(StreamStateEntry::new(key, state));
            }
        }
        Ok(StateMessage::global(
            self.shared.clone().unwrap_or(Value::Null),
            stream_states,
        ))
    }
}

/// Payload of one stream in a STREAM checkpoint
fn stream_payload(tracked: &TrackedStream) -> Result<Value> {
    if !tracked.touched {
        if let Some(prior) = &tracked.prior {
            return Ok(prior.clone());
        }
    }
    Ok(match &tracked.phase {
        Phase::Cursor(Some(values)) => values.to_payload(),
        Phase::InitialLoad(Some(status)) | Phase::FullRefresh(Some(status)) => status.to_payload()?,
        _ => json!({}),
    })
}

/// Sub-state of one stream in a GLOBAL checkpoint, `None` when there is nothing to resume
fn global_sub_state(key: &StreamKey, tracked: &TrackedStream) -> Result<Option<Value>> {
    if !tracked.touched {
        if let Some(prior) = &tracked.prior {
            return Ok(Some(prior.clone()));
        }
    }
    Ok(match &tracked.phase {
        Phase::SnapshotComplete => Some(json!({
            "stream_name": key.name,
            "stream_namespace": key.namespace,
            "cursor_field": [],
            "cursor": null,
        })),
        Phase::InitialLoad(Some(status)) | Phase::FullRefresh(Some(status)) => {
            Some(status.to_payload()?)
        }
        Phase::Cursor(Some(values)) => Some(values.to_payload()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConfiguredStream, Stream};

    fn key(name: &str) -> StreamKey {
        StreamKey::new(name).with_namespace("public")
    }

    fn catalog() -> ConfiguredCatalog {
        ConfiguredCatalog::new()
            .add_stream(ConfiguredStream::incremental(
                Stream::new("events", json!({})).namespace("public"),
                vec!["id".into()],
            ))
            .add_stream(ConfiguredStream::new(
                Stream::new("users", json!({})).namespace("public"),
            ))
    }

    #[test]
    fn test_stream_mode_seed_and_cursor() {
        let mut prior = BTreeMap::new();
        prior.insert(key("events"), json!({"id": "10"}));
        let mut manager =
            CheckpointStateManager::seed(StateType::Stream, &InputState::Stream(prior), &catalog());

        assert_eq!(
            manager.read_strategy(&key("events"), &["id".into()]).unwrap(),
            ReadStrategy::Cursor
        );
        assert_eq!(
            manager.resume_cursor(&key("events")),
            Some(&CursorValues::single("id", "10"))
        );

        assert!(!manager
            .update_cursor(&key("events"), CursorValues::single("id", "9"))
            .unwrap());
        assert!(manager
            .update_cursor(&key("events"), CursorValues::single("id", "12"))
            .unwrap());

        let msg = manager.checkpoint_at(&key("events")).unwrap();
        assert_eq!(msg.payload_for(&key("events")), Some(&json!({"id": "12"})));
    }

    #[test]
    fn test_primary_key_regression_rejected() {
        let mut manager =
            CheckpointStateManager::seed(StateType::Stream, &InputState::Empty, &catalog());
        let users = key("users");
        assert!(manager
            .update_primary_key_load(&users, PrimaryKeyLoadStatus::new("id", "20", 20))
            .unwrap());
        assert!(!manager
            .update_primary_key_load(&users, PrimaryKeyLoadStatus::new("id", "5", 5))
            .unwrap());
        assert_eq!(manager.primary_key_status(&users).unwrap().ordinal, 20);
    }

    #[test]
    fn test_unknown_stream_is_state_error() {
        let manager = CheckpointStateManager::seed(StateType::Stream, &InputState::Empty, &catalog());
        assert!(matches!(
            manager.checkpoint_at(&key("missing")),
            Err(ConnectorError::State(_))
        ));
    }

    #[test]
    fn test_shared_state_requires_global() {
        let mut manager =
            CheckpointStateManager::seed(StateType::Stream, &InputState::Empty, &catalog());
        assert!(manager.update_shared_state(json!({"lsn": 1})).is_err());
    }

    #[test]
    fn test_full_refresh_final_state_drops_progress() {
        let mut manager =
            CheckpointStateManager::seed(StateType::Stream, &InputState::Empty, &catalog());
        let users = key("users");
        manager
            .update_primary_key_load(&users, PrimaryKeyLoadStatus::new("id", "3", 3))
            .unwrap();
        let msg = manager.final_state_for(&users, 3).unwrap();
        assert_eq!(msg.payload_for(&users), Some(&json!({})));
        assert!(manager.primary_key_status(&users).is_none());
    }

    #[test]
    fn test_primary_key_payload_round_trips() {
        let status = PrimaryKeyLoadStatus::new("id", "42", 42)
            .with_incremental_state(json!({"lsn": "0/1"}));
        let payload = status.to_payload().unwrap();
        assert_eq!(payload["state_type"], "primary_key");
        assert_eq!(PrimaryKeyLoadStatus::from_payload(&payload), Some(status));
    }
}
