//! Source configuration
//!
//! Loaded from JSON or YAML. `${VAR}` and `${VAR:-default}` references are
//! expanded from the environment before parsing, and every loader validates
//! the result.
//!
//! ```yaml
//! connection:
//!   url: "postgres://sync:${DB_PASSWORD}@db:5432/shop"
//!   database_type: postgres
//!   schema: sales
//! expected_state_type: global
//! checkpoint_interval: 5000
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sluice_rdbc::connection::{ConnectionConfig, DatabaseType};
use sluice_rdbc::types::TableName;
use std::collections::HashMap;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

use crate::error::{ConnectorError, Result};
use crate::protocol::StateType;
use crate::types::DatabaseUrl;

static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Database flavour behind the connection URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    /// PostgreSQL
    #[default]
    Postgres,
    /// MySQL/MariaDB
    Mysql,
    /// SQL Server
    SqlServer,
}

impl From<DatabaseKind> for DatabaseType {
    fn from(kind: DatabaseKind) -> Self {
        match kind {
            DatabaseKind::Postgres => DatabaseType::PostgreSQL,
            DatabaseKind::Mysql => DatabaseType::MySQL,
            DatabaseKind::SqlServer => DatabaseType::SqlServer,
        }
    }
}

/// How to reach the database
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct ConnectionSettings {
    /// Connection URL, may embed credentials
    #[validate(custom(function = "validate_not_empty"))]
    pub url: DatabaseUrl,

    /// Database flavour the connection must report, when set
    #[serde(default)]
    pub database_type: Option<DatabaseKind>,

    /// Only tables in this catalog/database are discovered
    #[serde(default)]
    pub database: Option<String>,

    /// Only tables in this schema are discovered
    #[serde(default)]
    pub schema: Option<String>,

    /// Connection timeout in milliseconds (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Extra driver properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Source connector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct SourceConfig {
    /// Database connection
    #[validate(nested)]
    pub connection: ConnectionSettings,

    /// State variant prior checkpoints must have (default: stream)
    #[serde(default)]
    pub expected_state_type: StateType,

    /// Rows between mid-stream checkpoints (default: 10000)
    #[serde(default = "default_checkpoint_interval")]
    #[validate(range(min = 1))]
    pub checkpoint_interval: u64,

    /// Upper bound on rows read per stream and invocation
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_rows_per_stream: Option<u64>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_checkpoint_interval() -> u64 {
    10_000
}

fn validate_not_empty(value: &DatabaseUrl) -> std::result::Result<(), ValidationError> {
    if value.is_blank() {
        return Err(ValidationError::new("empty"));
    }
    Ok(())
}

impl SourceConfig {
    /// Configuration for a URL with defaults everywhere else
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionSettings {
                url: DatabaseUrl::new(url),
                database_type: None,
                database: None,
                schema: None,
                connect_timeout_ms: default_connect_timeout_ms(),
                properties: HashMap::new(),
            },
            expected_state_type: StateType::default(),
            checkpoint_interval: default_checkpoint_interval(),
            max_rows_per_stream: None,
        }
    }

    /// Set the expected state type
    pub fn with_expected_state_type(mut self, state_type: StateType) -> Self {
        self.expected_state_type = state_type;
        self
    }

    /// Set the checkpoint interval
    pub fn with_checkpoint_interval(mut self, rows: u64) -> Self {
        self.checkpoint_interval = rows;
        self
    }

    /// Restrict discovery to one schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.connection.schema = Some(schema.into());
        self
    }

    /// Require a database flavour
    pub fn with_database_type(mut self, kind: DatabaseKind) -> Self {
        self.connection.database_type = Some(kind);
        self
    }

    /// Set the per-stream row limit
    pub fn with_max_rows_per_stream(mut self, rows: u64) -> Self {
        self.max_rows_per_stream = Some(rows);
        self
    }

    /// Load from a JSON value
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self> {
        Self::from_json_str(&value.to_string())
    }

    /// Load from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_json::from_str(&expanded)
            .map_err(|e| ConnectorError::config(format!("invalid configuration: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| ConnectorError::config(format!("invalid configuration: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Run validation, mapping failures to a configuration error
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ConnectorError::config(format!("invalid configuration: {}", e)))
    }

    /// Database-layer connection configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.connection.url.expose_secret())
            .with_connect_timeout(self.connection.connect_timeout_ms);
        for (key, value) in &self.connection.properties {
            config = config.with_property(key.clone(), value.clone());
        }
        config
    }

    /// Database type the connection is required to have
    pub fn database_type(&self) -> Option<DatabaseType> {
        self.connection.database_type.map(Into::into)
    }

    /// Reject a factory for a different database flavour
    pub fn verify_database_type(&self, actual: DatabaseType) -> Result<()> {
        match self.database_type() {
            Some(expected) if expected != actual => Err(ConnectorError::config(format!(
                "configured for {} but the connection is {}",
                expected, actual
            ))),
            _ => Ok(()),
        }
    }

    /// Whether a discovered table lies inside the configured database and schema
    pub fn in_scope(&self, table: &TableName) -> bool {
        let matches = |wanted: &Option<String>, actual: &Option<String>| match wanted {
            Some(wanted) => actual.as_deref() == Some(wanted.as_str()),
            None => true,
        };
        matches(&self.connection.database, &table.catalog)
            && matches(&self.connection.schema, &table.schema)
    }

    /// JSON schema of this configuration
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(SourceConfig)).unwrap_or_default()
    }
}

/// Expand `${VAR}` / `${VAR:-default}` references from the environment
pub fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
