// # Credential Store Trait
//
// Defines the interface for persisting connector credentials.
//
// ## Purpose
//
// The credential store holds one record per `(user_id, connector)`:
// - the provider credential bag
// - when the connection was established
// - when the connector last synchronized successfully
// - why syncing is blocked, after a provider reported a fatal error
//
// ## Implementations
//
// - In-memory: `MemoryCredentialStore`
// - File-based JSON with crash recovery: `FileCredentialStore`
//
// Stores are never called directly by adapters. All access goes through
// `CredentialManager`, which serializes operations per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::Credentials;

/// Stored state for one `(user_id, connector)` pair
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CredentialRecord {
    pub credentials: Credentials,
    /// When the credentials were stored
    pub connected_at: DateTime<Utc>,
    /// When the last successful sync finished
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Fatal provider error that stops further syncs until cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
}

impl CredentialRecord {
    /// Create a record for freshly stored credentials
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            connected_at: Utc::now(),
            last_sync: None,
            blocked: None,
        }
    }

    /// Seconds since the last successful sync, if any
    pub fn seconds_since_sync(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_sync
            .map(|at| now.signed_duration_since(at).num_seconds())
    }
}

/// Trait for credential store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get the stored credentials
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Credentials))`: the stored bag
    /// - `Ok(None)`: not connected
    /// - `Err(Error)`: storage error
    async fn get(&self, user_id: &str, connector: &str) -> Result<Option<Credentials>> {
        Ok(self.get_record(user_id, connector).await?.map(|r| r.credentials))
    }

    /// Get the full record
    async fn get_record(&self, user_id: &str, connector: &str)
    -> Result<Option<CredentialRecord>>;

    /// Replace the credentials, resetting the record
    async fn store(&self, user_id: &str, connector: &str, credentials: Credentials) -> Result<()>;

    /// Delete the record (no error if absent)
    async fn remove(&self, user_id: &str, connector: &str) -> Result<()>;

    /// Whether credentials are stored
    async fn has_credentials(&self, user_id: &str, connector: &str) -> Result<bool> {
        Ok(self.get_record(user_id, connector).await?.is_some())
    }

    /// Record a successful sync
    ///
    /// No-op when the record no longer exists.
    async fn set_last_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>)
    -> Result<()>;

    /// Set or clear the fatal-error block
    ///
    /// No-op when the record no longer exists.
    async fn set_blocked(&self, user_id: &str, connector: &str, reason: Option<String>)
    -> Result<()>;

    /// All stored `(user_id, connector)` pairs
    async fn list(&self) -> Result<Vec<(String, String)>>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<()>;
}
