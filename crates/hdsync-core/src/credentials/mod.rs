//! Credential lifecycle
//!
//! [`CredentialManager`] is the only path between the engine and a
//! [`CredentialStore`]. Every operation on a `(user_id, connector)` key
//! takes that key's lock, so a purge triggered by an expired token can
//! never interleave with a concurrent reconnect of the same key.
//!
//! Lifecycle per key:
//!
//! ```text
//! Disconnected --instructions--> AwaitingAuthorization --connect--> Connected
//!       ^                                                              |
//!       +------------ AuthExpired / disconnect / AuthRejected ---------+
//! ```

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::CredentialStoreConfig;
use crate::error::Result;
use crate::model::{ConnectorState, Credentials};
use crate::traits::{CredentialRecord, CredentialStore};

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

/// Open the store described by `config`
pub async fn open_store(config: &CredentialStoreConfig) -> Result<Arc<dyn CredentialStore>> {
    config.validate()?;
    Ok(match config {
        CredentialStoreConfig::File { path } => Arc::new(FileCredentialStore::new(path).await?),
        CredentialStoreConfig::Memory => Arc::new(MemoryCredentialStore::new()),
    })
}

fn key(user_id: &str, connector: &str) -> String {
    format!("{}/{}", user_id, connector)
}

/// Serializes credential operations per `(user_id, connector)`
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Keys awaiting authorization, with credentials parked by a redirect
    pending: Mutex<HashMap<String, Option<Credentials>>>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store
    pub fn backend(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Acquire the lock for one key
    pub async fn lock(&self, user_id: &str, connector: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key(user_id, connector))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn get(&self, user_id: &str, connector: &str) -> Result<Option<Credentials>> {
        let _guard = self.lock(user_id, connector).await;
        self.store.get(user_id, connector).await
    }

    pub async fn record(&self, user_id: &str, connector: &str) -> Result<Option<CredentialRecord>> {
        let _guard = self.lock(user_id, connector).await;
        self.store.get_record(user_id, connector).await
    }

    pub async fn has(&self, user_id: &str, connector: &str) -> Result<bool> {
        let _guard = self.lock(user_id, connector).await;
        self.store.has_credentials(user_id, connector).await
    }

    /// Store the credentials of a completed connection
    pub async fn store(&self, user_id: &str, connector: &str, credentials: Credentials) -> Result<()> {
        let _guard = self.lock(user_id, connector).await;
        self.pending.lock().await.remove(&key(user_id, connector));
        self.store.store(user_id, connector, credentials).await?;
        info!(user = user_id, connector, "Credentials stored");
        Ok(())
    }

    /// Forget everything about a key, pending authorization included
    pub async fn remove(&self, user_id: &str, connector: &str) -> Result<()> {
        let _guard = self.lock(user_id, connector).await;
        self.pending.lock().await.remove(&key(user_id, connector));
        self.store.remove(user_id, connector).await?;
        info!(user = user_id, connector, "Credentials removed");
        Ok(())
    }

    /// Remove the record only if it still holds `expected`
    ///
    /// Used when an update that started with `expected` finds it revoked;
    /// credentials stored by a reconnect in the meantime are kept.
    ///
    /// # Returns
    ///
    /// `Ok(true)` when the record was removed.
    pub async fn remove_if_unchanged(
        &self,
        user_id: &str,
        connector: &str,
        expected: &Credentials,
    ) -> Result<bool> {
        let _guard = self.lock(user_id, connector).await;
        match self.store.get(user_id, connector).await? {
            Some(current) if current == *expected => {
                self.pending.lock().await.remove(&key(user_id, connector));
                self.store.remove(user_id, connector).await?;
                info!(user = user_id, connector, "Credentials removed");
                Ok(true)
            }
            Some(_) => {
                debug!(user = user_id, connector, "Credentials replaced meanwhile, keeping them");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Block further syncs of a key, if it still holds `expected`
    pub async fn block_if_unchanged(
        &self,
        user_id: &str,
        connector: &str,
        expected: &Credentials,
        reason: &str,
    ) -> Result<bool> {
        let _guard = self.lock(user_id, connector).await;
        match self.store.get(user_id, connector).await? {
            Some(current) if current == *expected => {
                self.store
                    .set_blocked(user_id, connector, Some(reason.to_string()))
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Lift a block
    ///
    /// # Returns
    ///
    /// `Ok(false)` when no credentials are stored for the key.
    pub async fn unblock(&self, user_id: &str, connector: &str) -> Result<bool> {
        let _guard = self.lock(user_id, connector).await;
        if !self.store.has_credentials(user_id, connector).await? {
            return Ok(false);
        }
        self.store.set_blocked(user_id, connector, None).await?;
        info!(user = user_id, connector, "Block cleared");
        Ok(true)
    }

    pub async fn set_last_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock(user_id, connector).await;
        self.store.set_last_sync(user_id, connector, at).await
    }

    /// Mark a key as awaiting authorization
    ///
    /// `parked` replaces any credentials parked earlier.
    pub async fn mark_awaiting(&self, user_id: &str, connector: &str, parked: Option<Credentials>) {
        self.pending
            .lock()
            .await
            .insert(key(user_id, connector), parked);
    }

    /// Credentials parked by the last redirect
    pub async fn parked(&self, user_id: &str, connector: &str) -> Option<Credentials> {
        self.pending
            .lock()
            .await
            .get(&key(user_id, connector))
            .cloned()
            .flatten()
    }

    pub async fn state(&self, user_id: &str, connector: &str) -> Result<ConnectorState> {
        if self.has(user_id, connector).await? {
            return Ok(ConnectorState::Connected);
        }
        if self.pending.lock().await.contains_key(&key(user_id, connector)) {
            return Ok(ConnectorState::AwaitingAuthorization);
        }
        Ok(ConnectorState::Disconnected)
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager").finish_non_exhaustive()
    }
}
