//! Output sinks
//!
//! - [`MessageSink`]: receives records, checkpoints and traces in emission order
//! - [`ValidationSink`]: receives catalog mismatches found while planning

use serde::Serialize;
use serde_json::Value;
use sluice_rdbc::types::TableName;
use std::fmt;
use std::io::Write;
use tracing::warn;

use crate::catalog::StreamKey;
use crate::error::Result;
use crate::protocol::{Message, RecordMessage, StateMessage};

/// Append-only consumer of source messages
pub trait MessageSink: Send {
    /// Accept one message
    fn accept(&mut self, message: &Message) -> Result<()>;
}

/// Writes each message as one JSON line, flushing after every line
pub struct JsonLineSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLineSink<W> {
    /// Sink over any writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLineSink<std::io::Stdout> {
    /// Sink writing to standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> MessageSink for JsonLineSink<W> {
    fn accept(&mut self, message: &Message) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects messages in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Vec<Message>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything accepted so far
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Accepted records
    pub fn records(&self) -> Vec<&RecordMessage> {
        self.messages.iter().filter_map(Message::as_record).collect()
    }

    /// Accepted checkpoints
    pub fn states(&self) -> Vec<&StateMessage> {
        self.messages.iter().filter_map(Message::as_state).collect()
    }
}

impl MessageSink for MemorySink {
    fn accept(&mut self, message: &Message) -> Result<()> {
        self.messages.push(message.clone());
        Ok(())
    }
}

/// A mismatch between the configured catalog and the live database
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    /// No table matches the stream
    TableNotFound {
        /// Stream
        stream: StreamKey,
    },
    /// Several tables match the stream
    AmbiguousTable {
        /// Stream
        stream: StreamKey,
        /// Matching tables
        candidates: Vec<TableName>,
    },
    /// A configured field has no column
    ColumnNotFound {
        /// Stream
        stream: StreamKey,
        /// Missing column
        column: String,
    },
    /// A column's type disagrees with the configured field schema
    TypeMismatch {
        /// Stream
        stream: StreamKey,
        /// Column
        column: String,
        /// Configured schema
        expected: Value,
        /// Schema derived from the column type
        actual: Value,
    },
}

impl ValidationFailure {
    /// Stream the failure concerns
    pub fn stream(&self) -> &StreamKey {
        match self {
            Self::TableNotFound { stream }
            | Self::AmbiguousTable { stream, .. }
            | Self::ColumnNotFound { stream, .. }
            | Self::TypeMismatch { stream, .. } => stream,
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableNotFound { stream } => write!(f, "table not found for stream {}", stream),
            Self::AmbiguousTable { stream, candidates } => {
                let names: Vec<String> = candidates.iter().map(|t| t.to_string()).collect();
                write!(
                    f,
                    "stream {} matches several tables: {}",
                    stream,
                    names.join(", ")
                )
            }
            Self::ColumnNotFound { stream, column } => {
                write!(f, "column {} not found in stream {}", column, stream)
            }
            Self::TypeMismatch {
                stream,
                column,
                expected,
                actual,
            } => write!(
                f,
                "column {} of stream {} has schema {} but {} was configured",
                column, stream, actual, expected
            ),
        }
    }
}

/// Consumer of catalog mismatches; never alters control flow
pub trait ValidationSink: Send {
    /// Report one mismatch
    fn report(&mut self, failure: ValidationFailure);
}

/// Collects validation failures in memory
#[derive(Debug, Default)]
pub struct MemoryValidationSink {
    failures: Vec<ValidationFailure>,
}

impl MemoryValidationSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far
    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Whether nothing was reported
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl ValidationSink for MemoryValidationSink {
    fn report(&mut self, failure: ValidationFailure) {
        self.failures.push(failure);
    }
}

/// Logs validation failures as warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingValidationSink;

impl ValidationSink for LoggingValidationSink {
    fn report(&mut self, failure: ValidationFailure) {
        warn!(stream = %failure.stream(), "{}", failure);
    }
}
