//! Catalog types for describing configured streams

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConnectorError, Result};

/// Identity of a stream: name plus optional namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Stream name (table name)
    pub name: String,
    /// Namespace (schema or catalog)
    #[serde(default)]
    pub namespace: Option<String>,
}

impl StreamKey {
    /// Key without namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Set namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A stream represents the rows of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// Name of the stream
    pub name: String,

    /// Namespace (schema or database name)
    #[serde(default)]
    pub namespace: Option<String>,

    /// JSON Schema of the stream's records
    #[serde(default)]
    pub json_schema: serde_json::Value,
}

impl Stream {
    /// Create a new stream
    pub fn new(name: impl Into<String>, json_schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            json_schema,
        }
    }

    /// Set namespace
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Identity of this stream
    pub fn key(&self) -> StreamKey {
        StreamKey {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Top-level field names declared in the schema
    pub fn field_names(&self) -> Vec<String> {
        self.json_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Declared schema of one top-level field
    pub fn field_schema(&self, field: &str) -> Option<&serde_json::Value> {
        self.json_schema.get("properties")?.get(field)
    }
}

/// Sync mode for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full refresh: re-read all data each sync
    #[default]
    FullRefresh,
    /// Incremental: read only new/changed data
    Incremental,
}

/// Configured catalog (user's selection of streams and sync modes)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    /// Configured streams
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Create an empty configured catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ConnectorError::config(format!("invalid configured catalog: {}", e)))
    }

    /// Add a configured stream
    pub fn add_stream(mut self, stream: ConfiguredStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Find a configured stream by key
    pub fn find(&self, key: &StreamKey) -> Option<&ConfiguredStream> {
        self.streams.iter().find(|s| &s.key() == key)
    }
}

/// A stream configured by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredStream {
    /// The stream definition
    pub stream: Stream,

    /// Selected sync mode
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Cursor columns for incremental sync
    #[serde(default)]
    pub cursor_field: Option<Vec<String>>,

    /// Primary key override, as field paths
    #[serde(default)]
    pub primary_key: Option<Vec<Vec<String>>>,
}

impl ConfiguredStream {
    /// Full-refresh stream
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            sync_mode: SyncMode::FullRefresh,
            cursor_field: None,
            primary_key: None,
        }
    }

    /// Incremental stream ordered by the given cursor columns
    pub fn incremental(stream: Stream, cursor: Vec<String>) -> Self {
        Self {
            stream,
            sync_mode: SyncMode::Incremental,
            cursor_field: Some(cursor),
            primary_key: None,
        }
    }

    /// Set primary key columns
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = Some(columns.into_iter().map(|c| vec![c]).collect());
        self
    }

    /// Identity of the configured stream
    pub fn key(&self) -> StreamKey {
        self.stream.key()
    }

    /// Whether the stream syncs incrementally
    pub fn is_incremental(&self) -> bool {
        self.sync_mode == SyncMode::Incremental
    }

    /// Configured cursor column names
    pub fn cursor_columns(&self) -> Vec<String> {
        self.cursor_field.clone().unwrap_or_default()
    }

    /// Configured primary key column names (first element of each path)
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.primary_key
            .iter()
            .flatten()
            .filter_map(|path| path.first().cloned())
            .collect()
    }
}
