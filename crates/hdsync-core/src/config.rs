//! Configuration types for the sync engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Connectors to enable
    pub connectors: Vec<ConnectorConfig>,

    /// Credential store configuration
    #[serde(default)]
    pub credential_store: CredentialStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Optional scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl SyncConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.connectors.is_empty() {
            return Err(crate::Error::config("No connectors configured"));
        }

        let mut seen = std::collections::HashSet::new();
        for connector in &self.connectors {
            connector.validate()?;
            if !seen.insert(connector.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Connector '{}' is configured twice",
                    connector.name
                )));
            }
        }

        self.credential_store.validate()?;
        self.engine.validate()?;
        self.scheduler.validate()?;

        Ok(())
    }
}

/// Per-connector configuration
///
/// Secrets never appear in Debug output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Registered adapter name (e.g. "fitbit")
    pub name: String,

    /// OAuth client id / consumer key
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret / consumer secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// API key for key-based providers
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the provider API base URL
    #[serde(default)]
    pub api_base: Option<String>,

    /// Public base URL of this service, used for OAuth callbacks and the
    /// local `/connect` redirector
    #[serde(default)]
    pub callback_base_url: Option<String>,
}

impl ConnectorConfig {
    /// Create a configuration with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set OAuth client credentials
    pub fn with_client(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Set the callback base URL
    pub fn with_callback_base_url(mut self, base: impl Into<String>) -> Self {
        self.callback_base_url = Some(base.into());
        self
    }

    /// Validate the connector configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Connector name cannot be empty"));
        }
        for (field, value) in [
            ("api_base", &self.api_base),
            ("callback_base_url", &self.callback_base_url),
        ] {
            if let Some(url) = value
                && !url.starts_with("https://")
                && !url.starts_with("http://")
            {
                return Err(crate::Error::config(format!(
                    "Connector '{}' {} must be an http(s) URL. Got: {}",
                    self.name, field, url
                )));
            }
        }
        Ok(())
    }

    /// Client id, required by OAuth adapters
    pub fn require_client_id(&self) -> Result<&str, crate::Error> {
        self.require(&self.client_id, "client_id")
    }

    /// Client secret, required by OAuth adapters
    pub fn require_client_secret(&self) -> Result<&str, crate::Error> {
        self.require(&self.client_secret, "client_secret")
    }

    /// API key, required by key-based adapters
    pub fn require_api_key(&self) -> Result<&str, crate::Error> {
        self.require(&self.api_key, "api_key")
    }

    /// API base URL without a trailing slash
    pub fn api_base_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.api_base
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
    }

    /// Callback base URL without a trailing slash
    pub fn callback_base(&self) -> &str {
        self.callback_base_url
            .as_deref()
            .unwrap_or("http://localhost:8080")
            .trim_end_matches('/')
    }

    fn require<'a>(&self, value: &'a Option<String>, field: &str) -> Result<&'a str, crate::Error> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(crate::Error::config(format!(
                "Connector '{}' requires {}",
                self.name, field
            ))),
        }
    }
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("ConnectorConfig")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("callback_base_url", &self.callback_base_url)
            .finish()
    }
}

/// Credential store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialStoreConfig {
    /// File-based store
    File {
        /// Path to the credentials file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

impl CredentialStoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            CredentialStoreConfig::File { path } if path.trim().is_empty() => Err(
                crate::Error::config("Credential store path cannot be empty"),
            ),
            _ => Ok(()),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries of one page after a rate-limit response
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// Fixed backoff before each rate-limit retry (in milliseconds)
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Upper bound on pages fetched per endpoint
    #[serde(default = "default_max_pages_per_endpoint")]
    pub max_pages_per_endpoint: usize,

    /// Endpoints of one update fetched concurrently
    #[serde(default = "default_endpoint_concurrency")]
    pub endpoint_concurrency: usize,

    /// Global deadline for one update (in seconds)
    ///
    /// When it fires, in-flight requests are abandoned and the records
    /// accumulated so far are returned.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_pages_per_endpoint == 0 {
            return Err(crate::Error::config("max_pages_per_endpoint must be > 0"));
        }
        if self.endpoint_concurrency == 0 {
            return Err(crate::Error::config("endpoint_concurrency must be > 0"));
        }
        if self.sync_timeout_secs == 0 {
            return Err(crate::Error::config("sync_timeout_secs must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_retries: default_rate_limit_retries(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_pages_per_endpoint: default_max_pages_per_endpoint(),
            endpoint_concurrency: default_endpoint_concurrency(),
            sync_timeout_secs: default_sync_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Periodic sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between sync rounds (in seconds)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Connectors synchronized concurrently within a round
    #[serde(default = "default_connector_concurrency")]
    pub connector_concurrency: usize,
}

impl SchedulerConfig {
    /// Validate the scheduler settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.sync_interval_secs == 0 {
            return Err(crate::Error::config("sync_interval_secs must be > 0"));
        }
        if self.connector_concurrency == 0 {
            return Err(crate::Error::config("connector_concurrency must be > 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            connector_concurrency: default_connector_concurrency(),
        }
    }
}

fn default_rate_limit_retries() -> u32 {
    3
}

fn default_rate_limit_backoff_ms() -> u64 {
    500
}

fn default_max_pages_per_endpoint() -> usize {
    500
}

fn default_endpoint_concurrency() -> usize {
    2
}

fn default_sync_timeout_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_sync_interval_secs() -> u64 {
    3600
}

fn default_connector_concurrency() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let engine: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(engine.rate_limit_retries, 3);
        assert_eq!(engine.rate_limit_backoff_ms, 500);
        assert_eq!(engine.endpoint_concurrency, 2);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_sync_config_requires_connectors() {
        let config = SyncConfig::default();
        assert!(config.validate().is_err());

        let config = SyncConfig {
            connectors: vec![ConnectorConfig::new("github")],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_connectors_rejected() {
        let config = SyncConfig {
            connectors: vec![ConnectorConfig::new("fitbit"), ConnectorConfig::new("fitbit")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_connector_urls_must_be_http() {
        let config = ConnectorConfig::new("github").with_api_base("ftp://example.com");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connector_debug_hides_secrets() {
        let config = ConnectorConfig::new("fitbit")
            .with_client("consumer-key", "consumer-secret-value")
            .with_api_key("api-key-value");
        let debug = format!("{:?}", config);
        assert!(debug.contains("consumer-key"));
        assert!(!debug.contains("consumer-secret-value"));
        assert!(!debug.contains("api-key-value"));
    }

    #[test]
    fn test_required_fields() {
        let config = ConnectorConfig::new("moodpanda");
        assert!(config.require_api_key().is_err());

        let config = config.with_api_key("  ");
        assert!(config.require_api_key().is_err());

        let config = ConnectorConfig::new("moodpanda").with_api_key("k");
        assert_eq!(config.require_api_key().unwrap(), "k");
    }

    #[test]
    fn test_api_base_trims_trailing_slash() {
        let config = ConnectorConfig::new("github").with_api_base("http://127.0.0.1:1234/");
        assert_eq!(config.api_base_or("https://api.github.com"), "http://127.0.0.1:1234");
        let config = ConnectorConfig::new("github");
        assert_eq!(config.api_base_or("https://api.github.com"), "https://api.github.com");
    }

    #[test]
    fn test_store_config_tagged() {
        let config: CredentialStoreConfig =
            serde_json::from_str(r#"{"type":"file","path":"/var/lib/hdsync/credentials.json"}"#)
                .unwrap();
        assert!(matches!(config, CredentialStoreConfig::File { .. }));
        assert!(config.validate().is_ok());
    }
}
