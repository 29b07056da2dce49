//! Messages exchanged with the host process
//!
//! Every message is one JSON object tagged by `type`. Checkpoint state uses a
//! camelCase envelope:
//!
//! ```json
//! {"type":"STATE","state":{"type":"STREAM",
//!   "stream":{"descriptor":{"name":"orders","namespace":"sales"},"state":{"id":"150"}},
//!   "sourceStats":{"recordCount":50}}}
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::StreamKey;
use crate::error::{ConnectorError, FailureType};

/// Checkpoint state variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    /// Independent per-stream state
    #[default]
    #[serde(alias = "stream")]
    Stream,
    /// Shared CDC state plus per-stream sub-states
    #[serde(alias = "global")]
    Global,
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "STREAM"),
            Self::Global => write!(f, "GLOBAL"),
        }
    }
}

/// Stream identity as it appears in checkpoint records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Stream name
    pub name: String,
    /// Stream namespace
    #[serde(default)]
    pub namespace: Option<String>,
}

impl From<&StreamKey> for StreamDescriptor {
    fn from(key: &StreamKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        }
    }
}

impl From<StreamDescriptor> for StreamKey {
    fn from(descriptor: StreamDescriptor) -> Self {
        Self {
            name: descriptor.name,
            namespace: descriptor.namespace,
        }
    }
}

/// One stream's opaque checkpoint payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStateEntry {
    /// Which stream
    pub descriptor: StreamDescriptor,
    /// Opaque payload
    #[serde(default)]
    pub state: Value,
}

impl StreamStateEntry {
    /// Entry for a stream
    pub fn new(key: &StreamKey, state: Value) -> Self {
        Self {
            descriptor: key.into(),
            state,
        }
    }
}

/// Shared payload plus per-stream sub-states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStateEntry {
    /// Shared payload (e.g. CDC log position)
    #[serde(default)]
    pub shared_state: Value,
    /// Per-stream sub-states
    pub stream_states: Vec<StreamStateEntry>,
}

/// Statistics attached to a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    /// Records emitted for the stream
    pub record_count: u64,
}

/// Checkpoint record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    /// Variant discriminator
    #[serde(rename = "type")]
    pub state_type: StateType,
    /// Set for STREAM records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStateEntry>,
    /// Set for GLOBAL records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalStateEntry>,
    /// Set on final checkpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stats: Option<SourceStats>,
}

impl StateMessage {
    /// STREAM record
    pub fn stream(key: &StreamKey, state: Value) -> Self {
        Self {
            state_type: StateType::Stream,
            stream: Some(StreamStateEntry::new(key, state)),
            global: None,
            source_stats: None,
        }
    }

    /// GLOBAL record
    pub fn global(shared_state: Value, stream_states: Vec<StreamStateEntry>) -> Self {
        Self {
            state_type: StateType::Global,
            stream: None,
            global: Some(GlobalStateEntry {
                shared_state,
                stream_states,
            }),
            source_stats: None,
        }
    }

    /// Attach a record count
    pub fn with_record_count(mut self, record_count: u64) -> Self {
        self.source_stats = Some(SourceStats { record_count });
        self
    }

    /// Payload recorded for a stream, in either variant
    pub fn payload_for(&self, key: &StreamKey) -> Option<&Value> {
        let matches = |entry: &&StreamStateEntry| {
            entry.descriptor.name == key.name && entry.descriptor.namespace == key.namespace
        };
        match (&self.stream, &self.global) {
            (Some(entry), _) => Some(entry).filter(matches).map(|e| &e.state),
            (None, Some(global)) => global.stream_states.iter().find(matches).map(|e| &e.state),
            (None, None) => None,
        }
    }
}

/// One row of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMessage {
    /// Stream name
    pub stream: String,
    /// Stream namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Mapped column values
    pub data: Map<String, Value>,
    /// Emission time, milliseconds since the epoch
    pub emitted_at: i64,
}

/// Outcome of a connectivity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Check passed
    Succeeded,
    /// Check failed
    Failed,
}

/// Connectivity check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Outcome
    pub status: Status,
    /// Explanation for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionStatus {
    /// Successful check
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            message: None,
        }
    }

    /// Failed check
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            message: Some(message.into()),
        }
    }

    /// Whether the check passed
    pub fn is_success(&self) -> bool {
        self.status == Status::Succeeded
    }
}

/// Structured error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTrace {
    /// User-facing message
    pub message: String,
    /// Underlying error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    /// Classification
    pub failure_type: FailureType,
}

/// Trace message wrapping an error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMessage {
    /// Emission time, milliseconds since the epoch
    pub emitted_at: i64,
    /// Error details
    pub error: ErrorTrace,
}

impl TraceMessage {
    /// Trace for a connector error
    pub fn from_error(message: impl Into<String>, error: &ConnectorError) -> Self {
        Self {
            emitted_at: now_millis(),
            error: ErrorTrace {
                message: message.into(),
                internal_message: Some(error.to_string()),
                failure_type: error.failure_type(),
            },
        }
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

/// Log line forwarded to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity
    pub level: LogLevel,
    /// Text
    pub message: String,
}

/// Any message produced by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Data row
    Record {
        /// The row
        record: RecordMessage,
    },
    /// Checkpoint
    State {
        /// The checkpoint
        state: StateMessage,
    },
    /// Check outcome
    ConnectionStatus {
        /// The outcome
        #[serde(rename = "connectionStatus")]
        connection_status: ConnectionStatus,
    },
    /// Error report
    Trace {
        /// The report
        trace: TraceMessage,
    },
    /// Log line
    Log {
        /// The line
        log: LogMessage,
    },
}

impl Message {
    /// Record for a stream row
    pub fn record(key: &StreamKey, data: Map<String, Value>) -> Self {
        Self::Record {
            record: RecordMessage {
                stream: key.name.clone(),
                namespace: key.namespace.clone(),
                data,
                emitted_at: now_millis(),
            },
        }
    }

    /// Checkpoint message
    pub fn state(state: StateMessage) -> Self {
        Self::State { state }
    }

    /// Check outcome message
    pub fn connection_status(connection_status: ConnectionStatus) -> Self {
        Self::ConnectionStatus { connection_status }
    }

    /// Trace message
    pub fn trace(trace: TraceMessage) -> Self {
        Self::Trace { trace }
    }

    /// Log message
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            log: LogMessage {
                level,
                message: message.into(),
            },
        }
    }

    /// The checkpoint carried by this message, if any
    pub fn as_state(&self) -> Option<&StateMessage> {
        match self {
            Self::State { state } => Some(state),
            _ => None,
        }
    }

    /// The record carried by this message, if any
    pub fn as_record(&self) -> Option<&RecordMessage> {
        match self {
            Self::Record { record } => Some(record),
            _ => None,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
