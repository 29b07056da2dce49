//! Connectivity check
//!
//! Validates a raw configuration, then proves the database is reachable and
//! at least one table's columns can be read. The check never returns an
//! error: every failure becomes a `FAILED` status with a trace.

use serde_json::Value as JsonValue;
use sluice_rdbc::connection::ConnectionFactory;
use sluice_rdbc::metadata::MetadataSession;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{ConnectorError, Result};
use crate::protocol::{ConnectionStatus, Message, TraceMessage};
use crate::read::within_connect_timeout;

/// Outcome of a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Final status
    pub status: ConnectionStatus,
    /// Error details when the check failed
    pub trace: Option<TraceMessage>,
}

impl CheckReport {
    fn succeeded() -> Self {
        Self {
            status: ConnectionStatus::succeeded(),
            trace: None,
        }
    }

    fn failed(error: &ConnectorError) -> Self {
        let message = describe_failure(error);
        Self {
            status: ConnectionStatus::failed(message.clone()),
            trace: Some(TraceMessage::from_error(message, error)),
        }
    }

    /// Whether the check passed
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Protocol messages to emit, trace first
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(2);
        if let Some(trace) = &self.trace {
            out.push(Message::trace(trace.clone()));
        }
        out.push(Message::connection_status(self.status.clone()));
        out
    }
}

/// User-facing text for a failed check
pub fn describe_failure(error: &ConnectorError) -> String {
    match error {
        ConnectorError::Rdbc(sluice_rdbc::Error::Driver {
            sql_state,
            vendor_code,
            message,
        }) => format!(
            "State code: {}; Error code: {}; Message: {}",
            sql_state, vendor_code, message
        ),
        other => format!(
            "Could not connect with provided configuration. Error: {}",
            other
        ),
    }
}

/// Runs connectivity checks
pub struct CheckOrchestrator {
    factory: Arc<dyn ConnectionFactory>,
}

impl CheckOrchestrator {
    /// Orchestrator over a connection factory
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    /// Check a raw configuration
    pub async fn check(&self, config: &JsonValue) -> CheckReport {
        match self.try_check(config).await {
            Ok(()) => {
                info!("Check succeeded");
                CheckReport::succeeded()
            }
            Err(e) => {
                warn!(error = %e, "Check failed");
                CheckReport::failed(&e)
            }
        }
    }

    async fn try_check(&self, raw: &JsonValue) -> Result<()> {
        let config = SourceConfig::from_json_value(raw)?;
        config.verify_database_type(self.factory.database_type())?;
        let connection = config.connection_config();
        let session = within_connect_timeout(
            config.connection.connect_timeout_ms,
            MetadataSession::open(self.factory.as_ref(), &connection),
        )
        .await?;
        let outcome = Self::find_readable_table(&session, &config).await;
        let closed = session.close().await;
        outcome?;
        closed?;
        Ok(())
    }

    /// Succeeds once any table's columns are readable
    async fn find_readable_table(session: &MetadataSession, config: &SourceConfig) -> Result<()> {
        let tables: Vec<_> = session
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| config.in_scope(t))
            .collect();
        if tables.is_empty() {
            debug!("No tables visible, connection verified");
            return Ok(());
        }

        let mut last_error = None;
        for table in &tables {
            match session.columns(table).await {
                Ok(_) => {
                    debug!(table = %table, "Column metadata readable");
                    return Ok(());
                }
                Err(e) => {
                    debug!(table = %table, error = %e, "Column metadata not readable");
                    last_error = Some(e);
                }
            }
        }

        let names: Vec<String> = tables.iter().map(|t| t.qualified_name()).collect();
        let attempted = format!("no readable table among {}", names.join(", "));
        Err(match last_error {
            // driver errors keep their state and vendor codes
            Some(sluice_rdbc::Error::Driver {
                sql_state,
                vendor_code,
                message,
            }) => sluice_rdbc::Error::driver(
                sql_state,
                vendor_code,
                format!("{} ({})", message, attempted),
            )
            .into(),
            Some(other) => ConnectorError::connection(format!("{}: {}", attempted, other)),
            None => ConnectorError::connection(attempted),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_message() {
        let err = ConnectorError::from(sluice_rdbc::Error::driver("28000", 1045, "access denied"));
        assert_eq!(
            describe_failure(&err),
            "State code: 28000; Error code: 1045; Message: access denied"
        );
    }

    #[test]
    fn test_generic_error_message() {
        let err = ConnectorError::config("missing url");
        assert_eq!(
            describe_failure(&err),
            "Could not connect with provided configuration. Error: configuration error: missing url"
        );
    }

    #[test]
    fn test_failed_report_messages() {
        let report = CheckReport::failed(&ConnectorError::connection("refused"));
        assert!(!report.is_success());
        let messages = report.messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], Message::Trace { .. }));
        assert!(matches!(messages[1], Message::ConnectionStatus { .. }));
    }
}
