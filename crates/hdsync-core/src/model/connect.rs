//! Connection lifecycle types
//!
//! Credentials, connect instructions and the per-connector state machine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

/// Parameters submitted by the user (form fields or OAuth callback query)
pub type ConnectParameters = HashMap<String, String>;

/// Look up a required, non-empty parameter
pub fn require_parameter<'a>(parameters: &'a ConnectParameters, key: &str) -> Result<&'a str> {
    match parameters.get(key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::missing_parameter(key)),
    }
}

/// Look up an optional parameter, treating empty values as absent
pub fn optional_parameter<'a>(parameters: &'a ConnectParameters, key: &str) -> Option<&'a str> {
    parameters
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Opaque per-provider credential bag
///
/// The Debug implementation never prints values.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Fetch a key that must be present in stored credentials
    ///
    /// A missing key means the stored bag is unusable, which the engine
    /// treats like an expired authorization.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::auth_expired(format!("stored credentials lack '{}'", key)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for key in self.0.keys() {
            map.entry(key, &"<REDACTED>");
        }
        map.finish()
    }
}

/// Kind of input field a connect parameter expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Text,
    Password,
}

/// Descriptor for one user-supplied connect parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParameter {
    pub display_name: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
}

impl ConnectParameter {
    pub fn text(display_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            key: key.into(),
            kind: ParameterKind::Text,
        }
    }

    pub fn password(display_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            key: key.into(),
            kind: ParameterKind::Password,
        }
    }
}

/// What the caller shows the user to start a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInstructions {
    pub authorization_url: String,
    pub parameters: Vec<ConnectParameter>,
    pub use_popup: bool,
}

/// Result of an adapter's `connect` step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Exchange finished; these credentials are stored
    Connected(Credentials),
    /// The user must visit `url`; `pending` survives until the callback
    Redirect {
        url: String,
        pending: Option<Credentials>,
    },
}

/// Result of `SyncEngine::connect` as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectResult {
    Connected,
    Redirect { url: String },
}

/// Per (user, connector) lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    AwaitingAuthorization,
    Connected,
}
