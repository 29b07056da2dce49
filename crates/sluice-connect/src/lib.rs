//! sluice-connect - Source connector core for relational databases
//!
//! Reads configured tables into record messages and tracks resumable
//! checkpoints so an interrupted sync continues where it stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         sluice-connect                          │
//! │  ReadOrchestrator                    CheckOrchestrator          │
//! │    ├── InputStateParser   (prior checkpoints -> InputState)     │
//! │    ├── CatalogReconciler  (catalog x metadata -> SelectPlan)    │
//! │    ├── SelectQueryBuilder (SelectPlan -> SQL)                   │
//! │    └── CheckpointStateManager (progress -> StateMessage)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          sluice-rdbc                            │
//! │  Connection, MetadataSession, SqlDialect, LogicalType mapping   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sluice_connect::prelude::*;
//!
//! let config = SourceConfig::from_yaml_str(&std::fs::read_to_string("source.yaml")?)?;
//! let catalog = ConfiguredCatalog::from_json_str(&catalog_json)?;
//! let state = InputStateParser::parse_json(&state_json)?;
//!
//! let orchestrator = ReadOrchestrator::new(config, factory);
//! let mut out = JsonLineSink::stdout();
//! let mut failures = LoggingValidationSink;
//! orchestrator.read(&catalog, &state, &mut out, &mut failures).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Connection URL type
pub mod types;

// Error types
pub mod error;

// Wire messages and configured catalog
pub mod catalog;
pub mod protocol;

// Checkpoint state
pub mod state;

// Planning and querying
pub mod query;
pub mod reconcile;

// Output
pub mod sink;

// Orchestration
pub mod check;
pub mod read;

// Runtime setup
pub mod config;
pub mod telemetry;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::{ConfiguredCatalog, ConfiguredStream, Stream, StreamKey, SyncMode};
    pub use crate::check::{CheckOrchestrator, CheckReport};
    pub use crate::config::{ConnectionSettings, DatabaseKind, SourceConfig};
    pub use crate::error::{ConnectorError, FailureType, Result};
    pub use crate::protocol::{
        ConnectionStatus, Message, RecordMessage, StateMessage, StateType, Status, TraceMessage,
    };
    pub use crate::read::{ReadOrchestrator, ReadSummary, SyncPhase};
    pub use crate::reconcile::{CatalogReconciler, SelectPlan};
    pub use crate::sink::{
        JsonLineSink, LoggingValidationSink, MemorySink, MemoryValidationSink, MessageSink,
        ValidationFailure, ValidationSink,
    };
    pub use crate::state::{
        CheckpointStateManager, CursorValues, InputState, InputStateParser, PrimaryKeyLoadStatus,
        ReadStrategy,
    };
}

// Re-export DatabaseUrl at crate root
pub use types::DatabaseUrl;

pub use error::{ConnectorError, Result};

// Re-export for connection factory implementations
pub use async_trait::async_trait;
