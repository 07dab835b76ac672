//! Error types for the sync engine
//!
//! Every error maps onto the caller-facing `{code, title, detail}` triple
//! through [`Error::to_response`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the sync engine
#[derive(Error, Debug)]
pub enum Error {
    /// A required connect parameter was absent or empty
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// The provider rejected the credential exchange
    #[error("Authorization rejected: {0}")]
    AuthRejected(String),

    /// No credentials are stored for the connector
    #[error("Connector {connector} is not connected")]
    NotConnected {
        /// Connector name
        connector: String,
    },

    /// Stored credentials are no longer accepted by the provider
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    /// The provider asked us to slow down and retries were exhausted
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Temporary failure, retryable on a later sync cycle
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Non-retryable failure reported by the provider
    #[error("Fatal provider error: {0}")]
    Fatal(String),

    /// The provider could not be reached at all
    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// A fatal provider error stopped syncing until an operator clears it
    #[error("Connector blocked: {0}")]
    Blocked(String),

    /// The connector was synchronized too recently
    #[error("Update too soon: {0}")]
    UpdateTooSoon(String),

    /// No adapter is registered under the given name
    #[error("Unknown connector: {0}")]
    UnknownConnector(String),

    /// A measurement or measurement set violates the data model
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// Credential persistence failed
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Measurement persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cancelled or hit its deadline
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Stable classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingParameter,
    AuthRejected,
    NotConnected,
    AuthExpired,
    RateLimited,
    Transient,
    Fatal,
    Blocked,
    ProviderUnreachable,
    UpdateTooSoon,
    UnknownConnector,
    InvalidMeasurement,
    CredentialStore,
    Storage,
    Config,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code reported to callers
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::MissingParameter | ErrorKind::InvalidMeasurement => 400,
            ErrorKind::AuthRejected
            | ErrorKind::NotConnected
            | ErrorKind::AuthExpired
            | ErrorKind::UpdateTooSoon => 403,
            ErrorKind::UnknownConnector => 404,
            ErrorKind::Blocked => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::ProviderUnreachable => 502,
            ErrorKind::Cancelled => 504,
            ErrorKind::Transient
            | ErrorKind::Fatal
            | ErrorKind::CredentialStore
            | ErrorKind::Storage
            | ErrorKind::Config
            | ErrorKind::Internal => 500,
        }
    }

    /// Short human-readable title
    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::MissingParameter => "Missing parameter",
            ErrorKind::AuthRejected => "Couldn't connect",
            ErrorKind::NotConnected => "Not connected",
            ErrorKind::AuthExpired => "Authorization expired",
            ErrorKind::RateLimited => "Rate limited",
            ErrorKind::Transient => "Couldn't update",
            ErrorKind::Fatal => "Provider error",
            ErrorKind::Blocked => "Sync blocked",
            ErrorKind::ProviderUnreachable => "Provider unreachable",
            ErrorKind::UpdateTooSoon => "Update too soon",
            ErrorKind::UnknownConnector => "Unknown connector",
            ErrorKind::InvalidMeasurement => "Invalid measurement",
            ErrorKind::CredentialStore => "Credential store failure",
            ErrorKind::Storage => "Storage failure",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal error",
        }
    }

    /// Whether a later sync cycle may succeed without user action
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::Transient
                | ErrorKind::ProviderUnreachable
                | ErrorKind::UpdateTooSoon
                | ErrorKind::Cancelled
        )
    }
}

/// Caller-facing error triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub title: String,
    pub detail: String,
}

impl ErrorResponse {
    /// Build a response from a kind and free-form detail
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            code: kind.status_code(),
            title: kind.title().to_string(),
            detail: detail.into(),
        }
    }
}

impl Error {
    /// Create a missing parameter error
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter(name.into())
    }

    /// Create an authorization rejected error
    pub fn auth_rejected(msg: impl Into<String>) -> Self {
        Self::AuthRejected(msg.into())
    }

    /// Create a not connected error
    pub fn not_connected(connector: impl Into<String>) -> Self {
        Self::NotConnected {
            connector: connector.into(),
        }
    }

    /// Create an authorization expired error
    pub fn auth_expired(msg: impl Into<String>) -> Self {
        Self::AuthExpired(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a fatal provider error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a blocked connector error
    pub fn blocked(msg: impl Into<String>) -> Self {
        Self::Blocked(msg.into())
    }

    /// Create a provider unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::ProviderUnreachable(msg.into())
    }

    /// Create an invalid measurement error
    pub fn invalid_measurement(msg: impl Into<String>) -> Self {
        Self::InvalidMeasurement(msg.into())
    }

    /// Create a credential store error
    pub fn credential_store(msg: impl Into<String>) -> Self {
        Self::CredentialStore(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingParameter(_) => ErrorKind::MissingParameter,
            Error::AuthRejected(_) => ErrorKind::AuthRejected,
            Error::NotConnected { .. } => ErrorKind::NotConnected,
            Error::AuthExpired(_) => ErrorKind::AuthExpired,
            Error::RateLimited(_) => ErrorKind::RateLimited,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::Blocked(_) => ErrorKind::Blocked,
            Error::ProviderUnreachable(_) => ErrorKind::ProviderUnreachable,
            Error::UpdateTooSoon(_) => ErrorKind::UpdateTooSoon,
            Error::UnknownConnector(_) => ErrorKind::UnknownConnector,
            Error::InvalidMeasurement(_) => ErrorKind::InvalidMeasurement,
            Error::CredentialStore(_) => ErrorKind::CredentialStore,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Io(_) | Error::Json(_) | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether a later sync cycle may succeed without user action
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Render the caller-facing `{code, title, detail}` triple
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.kind(), self.to_string())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
