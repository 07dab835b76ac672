// # File Credential Store
//
// JSON file implementation of CredentialStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: the new file is written next to the old one, then renamed
// - Backup: the previous file is copied to `.backup` before every write
// - Recovery: an unparseable file falls back to the backup, then to empty
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "users": {
//     "user-1": {
//       "fitbit": {
//         "credentials": { "token": "...", "token_secret": "..." },
//         "connected_at": "2025-01-09T12:00:00Z",
//         "last_sync": "2025-01-10T08:00:00Z"
//       }
//     }
//   }
// }
// ```
//
// The file holds provider secrets; it is created with the process umask
// and should live in a directory only the daemon can read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::Credentials;
use crate::traits::{CredentialRecord, CredentialStore};

/// Credential file format version
const CREDENTIAL_FILE_VERSION: &str = "1.0";

type Records = HashMap<String, HashMap<String, CredentialRecord>>;

/// File-based credential store
///
/// Every mutation is written through to disk before returning.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    users: Records,
    dirty: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CredentialFile {
    version: String,
    users: Records,
}

impl FileCredentialStore {
    /// Open or create the store at `path`
    ///
    /// Missing parent directories are created. A corrupted file is
    /// replaced by its backup when one parses.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create credential directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let users = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                users,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<Records> {
        match Self::load(path).await {
            Ok(users) => {
                tracing::debug!("Loaded credentials for {} users", users.len());
                Ok(users)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Credential file {} is corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with no connections.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(users) => {
                        tracing::info!("Recovered credentials for {} users from backup", users.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore credential file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(users)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with no connections.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Records> {
        if !path.exists() {
            tracing::debug!("Credential file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::credential_store(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file: CredentialFile = serde_json::from_str(&content)?;

        if file.version != CREDENTIAL_FILE_VERSION {
            tracing::warn!(
                "Credential file version mismatch: expected {}, got {}. Loading anyway.",
                CREDENTIAL_FILE_VERSION,
                file.version
            );
        }

        Ok(file.users)
    }

    async fn write(&self) -> Result<()> {
        let mut state = self.state.write().await;

        let json = serde_json::to_string_pretty(&CredentialFileRef {
            version: CREDENTIAL_FILE_VERSION,
            users: &state.users,
        })
        .map_err(|e| Error::credential_store(format!("Failed to serialize credentials: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::credential_store(format!("Failed to create {}: {}", temp_path.display(), e))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::credential_store(format!("Failed to write {}: {}", temp_path.display(), e))
            })?;
            file.flush().await.map_err(|e| {
                Error::credential_store(format!("Failed to flush {}: {}", temp_path.display(), e))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create credential backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::credential_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        state.dirty = false;
        tracing::trace!("Credentials written to {}", self.path.display());
        Ok(())
    }

    async fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Records) -> bool,
    {
        let changed = {
            let mut state = self.state.write().await;
            let changed = f(&mut state.users);
            state.dirty |= changed;
            changed
        };
        if changed { self.write().await } else { Ok(()) }
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[derive(serde::Serialize)]
struct CredentialFileRef<'a> {
    version: &'a str,
    users: &'a Records,
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_record(&self, user_id: &str, connector: &str) -> Result<Option<CredentialRecord>> {
        let state = self.state.read().await;
        Ok(state.users.get(user_id).and_then(|c| c.get(connector)).cloned())
    }

    async fn store(&self, user_id: &str, connector: &str, credentials: Credentials) -> Result<()> {
        self.mutate(|users| {
            users
                .entry(user_id.to_string())
                .or_default()
                .insert(connector.to_string(), CredentialRecord::new(credentials));
            true
        })
        .await
    }

    async fn remove(&self, user_id: &str, connector: &str) -> Result<()> {
        self.mutate(|users| {
            let Some(connectors) = users.get_mut(user_id) else {
                return false;
            };
            let removed = connectors.remove(connector).is_some();
            if connectors.is_empty() {
                users.remove(user_id);
            }
            removed
        })
        .await
    }

    async fn set_last_sync(&self, user_id: &str, connector: &str, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|users| {
            match users.get_mut(user_id).and_then(|c| c.get_mut(connector)) {
                Some(record) => {
                    record.last_sync = Some(at);
                    true
                }
                None => false,
            }
        })
        .await
    }

    async fn set_blocked(&self, user_id: &str, connector: &str, reason: Option<String>) -> Result<()> {
        self.mutate(|users| {
            match users.get_mut(user_id).and_then(|c| c.get_mut(connector)) {
                Some(record) if record.blocked != reason => {
                    record.blocked = reason;
                    true
                }
                _ => false,
            }
        })
        .await
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        let state = self.state.read().await;
        let mut pairs: Vec<(String, String)> = state
            .users
            .iter()
            .flat_map(|(user, connectors)| {
                connectors.keys().map(move |c| (user.clone(), c.clone()))
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn flush(&self) -> Result<()> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn token(value: &str) -> Credentials {
        Credentials::new().with("token", value)
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        store.store("u1", "github", token("abc")).await.unwrap();
        assert!(path.exists());

        let reopened = FileCredentialStore::new(&path).await.unwrap();
        assert_eq!(reopened.get("u1", "github").await.unwrap(), Some(token("abc")));
    }

    #[tokio::test]
    async fn test_file_store_remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path).await.unwrap();
        store.store("u1", "github", token("abc")).await.unwrap();
        store.remove("u1", "github").await.unwrap();

        let reopened = FileCredentialStore::new(&path).await.unwrap();
        assert!(!reopened.has_credentials("u1", "github").await.unwrap());
        assert!(reopened.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path).await.unwrap();
        store.store("u1", "github", token("first")).await.unwrap();
        store.store("u1", "github", token("second")).await.unwrap();

        let backup_path = FileCredentialStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after second write");

        fs::write(&path, b"{ not json").await.unwrap();

        let recovered = FileCredentialStore::new(&path).await.unwrap();
        assert_eq!(
            recovered.get("u1", "github").await.unwrap(),
            Some(token("first")),
            "Backup holds the state before the last write"
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupted_without_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, b"garbage").await.unwrap();

        let store = FileCredentialStore::new(&path).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_sync_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/credentials.json");

        let store = FileCredentialStore::new(&path).await.unwrap();
        store.store("u1", "withings", token("t")).await.unwrap();
        let at = DateTime::parse_from_rfc3339("2025-01-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.set_last_sync("u1", "withings", at).await.unwrap();

        let reopened = FileCredentialStore::new(&path).await.unwrap();
        let record = reopened.get_record("u1", "withings").await.unwrap().unwrap();
        assert_eq!(record.last_sync, Some(at));
    }

    #[tokio::test]
    async fn test_block_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path).await.unwrap();
        store.store("u1", "withings", token("t")).await.unwrap();
        store
            .set_blocked("u1", "withings", Some("measure: Withings says: invalid userid".to_string()))
            .await
            .unwrap();

        let reopened = FileCredentialStore::new(&path).await.unwrap();
        let record = reopened.get_record("u1", "withings").await.unwrap().unwrap();
        assert!(record.blocked.unwrap().contains("invalid userid"));

        reopened.set_blocked("u1", "withings", None).await.unwrap();
        let again = FileCredentialStore::new(&path).await.unwrap();
        assert_eq!(again.get_record("u1", "withings").await.unwrap().unwrap().blocked, None);
    }
}
