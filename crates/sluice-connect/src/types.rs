//! Connection URL holding credentials

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sluice_rdbc::connection::redact_url;
use std::fmt;

/// Database URL whose password never reaches logs or serialized config.
///
/// Formatting and serialization show the URL with its password masked;
/// deserialization takes the plain URL.
///
/// ```rust
/// use sluice_connect::DatabaseUrl;
///
/// let url = DatabaseUrl::new("postgres://app:hunter2@db/shop");
/// assert_eq!(url.to_string(), "postgres://app:***@db/shop");
/// assert_eq!(url.expose_secret(), "postgres://app:hunter2@db/shop");
/// ```
#[derive(Clone)]
pub struct DatabaseUrl(SecretString);

impl DatabaseUrl {
    /// Wrap a plain URL
    pub fn new(url: impl Into<String>) -> Self {
        Self(SecretString::new(url.into().into_boxed_str()))
    }

    /// The URL including credentials, for handing to the driver
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the URL is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.expose_secret().trim().is_empty()
    }

    fn masked(&self) -> String {
        redact_url(self.expose_secret())
    }
}

impl fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatabaseUrl").field(&self.masked()).finish()
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl Serialize for DatabaseUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.masked())
    }
}

impl<'de> Deserialize<'de> for DatabaseUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for DatabaseUrl {
    fn schema_name() -> String {
        "DatabaseUrl".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().description =
                Some("Database URL; the password is masked wherever the URL is shown".to_string());
        }
        schema
    }
}
