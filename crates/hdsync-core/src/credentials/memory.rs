// # Memory Credential Store
//
// In-memory implementation of CredentialStore.
//
// ## Crash Behavior
//
// - All connections are lost on restart
// - Users have to reconnect every connector after a restart
//
// ## When to Use
//
// - Tests
// - Embedded use where the host persists credentials itself

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::Credentials;
use crate::traits::{CredentialRecord, CredentialStore};

type Records = HashMap<String, HashMap<String, CredentialRecord>>;

/// In-memory credential store
///
/// Records are grouped by user, then by connector.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<Records>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored connections
    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_record(&self, user_id: &str, connector: &str) -> Result<Option<CredentialRecord>> {
        let guard = self.inner.read().await;
        Ok(guard.get(user_id).and_then(|c| c.get(connector)).cloned())
    }

    async fn store(&self, user_id: &str, connector: &str, credentials: Credentials) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard
            .entry(user_id.to_string())
            .or_default()
            .insert(connector.to_string(), CredentialRecord::new(credentials));
        Ok(())
    }

    async fn remove(&self, user_id: &str, connector: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(connectors) = guard.get_mut(user_id) {
            connectors.remove(connector);
            if connectors.is_empty() {
                guard.remove(user_id);
            }
        }
        Ok(())
    }

    async fn set_last_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.get_mut(user_id).and_then(|c| c.get_mut(connector)) {
            record.last_sync = Some(at);
        }
        Ok(())
    }

    async fn set_blocked(&self, user_id: &str, connector: &str, reason: Option<String>) -> Result<()> {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.get_mut(user_id).and_then(|c| c.get_mut(connector)) {
            record.blocked = reason;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        let guard = self.inner.read().await;
        let mut pairs: Vec<(String, String)> = guard
            .iter()
            .flat_map(|(user, connectors)| {
                connectors.keys().map(move |c| (user.clone(), c.clone()))
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
