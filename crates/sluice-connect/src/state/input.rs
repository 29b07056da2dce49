//! Prior checkpoint state parsing
//!
//! Hosts hand back whatever checkpoint records they stored, possibly
//! duplicated and possibly mixing STREAM and GLOBAL records. The parser
//! reduces them to exactly one [`InputState`] variant.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::catalog::StreamKey;
use crate::error::{ConnectorError, Result};
use crate::protocol::{GlobalStateEntry, StateType, StreamStateEntry};

/// Prior state of a sync, one variant per invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputState {
    /// No prior checkpoint
    #[default]
    Empty,
    /// Independent per-stream payloads
    Stream(BTreeMap<StreamKey, Value>),
    /// Shared CDC payload plus per-stream payloads
    Global {
        /// Shared payload (e.g. CDC log position)
        shared: Value,
        /// Payloads of streams covered by the shared state
        streams: BTreeMap<StreamKey, Value>,
        /// Streams tracked independently of the shared state
        non_global: BTreeMap<StreamKey, Value>,
    },
}

impl InputState {
    /// Variant of a non-empty state
    pub fn state_type(&self) -> Option<StateType> {
        match self {
            Self::Empty => None,
            Self::Stream(_) => Some(StateType::Stream),
            Self::Global { .. } => Some(StateType::Global),
        }
    }

    /// Whether no prior checkpoint exists
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Prior payload recorded for a stream
    pub fn stream_payload(&self, key: &StreamKey) -> Option<&Value> {
        match self {
            Self::Empty => None,
            Self::Stream(streams) => streams.get(key),
            Self::Global {
                streams,
                non_global,
                ..
            } => streams.get(key).or_else(|| non_global.get(key)),
        }
    }

    /// Whether the stream is tracked outside the shared state
    pub fn is_non_global(&self, key: &StreamKey) -> bool {
        match self {
            Self::Global { non_global, .. } => non_global.contains_key(key),
            _ => false,
        }
    }

    /// Shared payload of a global state
    pub fn shared_state(&self) -> Option<&Value> {
        match self {
            Self::Global { shared, .. } => Some(shared),
            _ => None,
        }
    }
}

/// What the parser threw away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Records superseded by a later record with the same identity
    pub duplicates_discarded: usize,
    /// Records whose type disagreed with the dominant type
    pub mismatched_discarded: usize,
    /// Legacy or untyped records
    pub unsupported_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Global,
    Stream(StreamKey),
}

#[derive(Debug)]
enum Parsed {
    Stream(StreamKey, Value),
    Global(GlobalStateEntry),
    Unsupported(String),
}

impl Parsed {
    fn group(&self) -> GroupKey {
        match self {
            Self::Stream(key, _) => GroupKey::Stream(key.clone()),
            Self::Global(_) | Self::Unsupported(_) => GroupKey::Global,
        }
    }
}

/// Parser for prior checkpoint records
pub struct InputStateParser;

impl InputStateParser {
    /// Parse raw JSON text holding an array of checkpoint records
    pub fn parse_json(text: &str) -> Result<InputState> {
        if text.trim().is_empty() {
            return Ok(InputState::Empty);
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ConnectorError::config(format!("malformed state: {}", e)))?;
        match value {
            Value::Null => Ok(InputState::Empty),
            Value::Array(records) => Self::parse(&records),
            other => Err(ConnectorError::config(format!(
                "state must be an array of checkpoint records, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse checkpoint records into one state
    pub fn parse(records: &[Value]) -> Result<InputState> {
        Self::parse_with_report(records).map(|(state, _)| state)
    }

    /// Parse checkpoint records, also reporting what was discarded
    pub fn parse_with_report(records: &[Value]) -> Result<(InputState, ParseReport)> {
        let parsed = records
            .iter()
            .enumerate()
            .map(|(idx, record)| parse_record(idx, record))
            .collect::<Result<Vec<_>>>()?;

        let mut report = ParseReport::default();

        // Last record per identity wins
        let mut last: HashMap<GroupKey, usize> = HashMap::new();
        let mut counts: HashMap<GroupKey, usize> = HashMap::new();
        for (idx, record) in parsed.iter().enumerate() {
            let group = record.group();
            *counts.entry(group.clone()).or_default() += 1;
            last.insert(group, idx);
        }
        for (group, count) in &counts {
            if *count > 1 {
                let discarded = count - 1;
                report.duplicates_discarded += discarded;
                warn!(group = ?group, discarded, "Discarded duplicate checkpoint records");
            }
        }

        let mut survivors = Vec::with_capacity(last.len());
        for (idx, record) in parsed.into_iter().enumerate() {
            if last.get(&record.group()) != Some(&idx) {
                continue;
            }
            if let Parsed::Unsupported(kind) = &record {
                warn!(record = idx, kind = %kind, "Dropped unsupported checkpoint record");
                report.unsupported_dropped += 1;
                continue;
            }
            survivors.push(record);
        }

        let state = match survivors.first() {
            None => InputState::Empty,
            Some(Parsed::Global(_)) => build_global(survivors, &mut report),
            Some(_) => build_stream(survivors, &mut report),
        };

        if report.mismatched_discarded > 0 {
            warn!(
                discarded = report.mismatched_discarded,
                dominant = ?state.state_type(),
                "Discarded checkpoint records inconsistent with the dominant state type"
            );
        }
        debug!(state_type = ?state.state_type(), ?report, "Parsed input state");
        Ok((state, report))
    }
}

fn build_global(survivors: Vec<Parsed>, report: &mut ParseReport) -> InputState {
    let mut shared = Value::Null;
    let mut streams = BTreeMap::new();
    let mut stream_records = Vec::new();

    for record in survivors {
        match record {
            Parsed::Global(global) => {
                shared = global.shared_state;
                for entry in global.stream_states {
                    streams.insert(StreamKey::from(entry.descriptor), entry.state);
                }
            }
            Parsed::Stream(key, payload) => stream_records.push((key, payload)),
            Parsed::Unsupported(_) => {}
        }
    }

    let mut non_global = BTreeMap::new();
    for (key, payload) in stream_records {
        if streams.contains_key(&key) {
            report.mismatched_discarded += 1;
        } else {
            non_global.insert(key, payload);
        }
    }

    InputState::Global {
        shared,
        streams,
        non_global,
    }
}

fn build_stream(survivors: Vec<Parsed>, report: &mut ParseReport) -> InputState {
    let mut streams = BTreeMap::new();
    for record in survivors {
        match record {
            Parsed::Stream(key, payload) => {
                streams.insert(key, payload);
            }
            Parsed::Global(_) => report.mismatched_discarded += 1,
            Parsed::Unsupported(_) => {}
        }
    }
    InputState::Stream(streams)
}

fn parse_record(idx: usize, record: &Value) -> Result<Parsed> {
    let obj = record.as_object().ok_or_else(|| {
        ConnectorError::config(format!(
            "checkpoint record {} is not an object but {}",
            idx,
            json_kind(record)
        ))
    })?;

    match obj.get("type").and_then(Value::as_str) {
        Some("STREAM") => {
            let stream = obj.get("stream").cloned().ok_or_else(|| {
                ConnectorError::config(format!("STREAM record {} has no stream descriptor", idx))
            })?;
            let entry: StreamStateEntry = serde_json::from_value(stream).map_err(|e| {
                ConnectorError::config(format!("STREAM record {} is malformed: {}", idx, e))
            })?;
            Ok(Parsed::Stream(entry.descriptor.into(), entry.state))
        }
        Some("GLOBAL") => {
            let global = obj.get("global").cloned().ok_or_else(|| {
                ConnectorError::config(format!("GLOBAL record {} has no global state", idx))
            })?;
            let entry: GlobalStateEntry = serde_json::from_value(global).map_err(|e| {
                ConnectorError::config(format!("GLOBAL record {} is malformed: {}", idx, e))
            })?;
            Ok(Parsed::Global(entry))
        }
        Some(other) => Ok(Parsed::Unsupported(other.to_string())),
        None => Ok(Parsed::Unsupported("untyped".to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
