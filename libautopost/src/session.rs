//! Persisted browser sessions, one opaque blob per account
//!
//! Publish and login both read and write an account's session. They take the
//! account's entry in [`SessionLocks`] for the whole launch-to-save span so a
//! login cannot overwrite a session while a publish is using it.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::error::{Result, SessionError};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, account_id: &str) -> Result<Option<String>>;
    async fn save(&self, account_id: &str, blob: &str) -> Result<()>;
    async fn clear(&self, account_id: &str) -> Result<()>;
}

/// One file per account under a directory
///
/// File names are the SHA-256 of the account id so ids never reach the
/// filesystem unescaped.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, account_id: &str) -> PathBuf {
        let digest = Sha256::digest(account_id.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }
}

fn persist_err(account_id: &str, reason: impl ToString) -> SessionError {
    SessionError::Persist {
        account: account_id.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, account_id: &str) -> Result<Option<String>> {
        let path = self.path_for(account_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Load {
                account: account_id.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn save(&self, account_id: &str, blob: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persist_err(account_id, e))?;

        let path = self.path_for(account_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob)
            .await
            .map_err(|e| persist_err(account_id, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| persist_err(account_id, e))?;
        }

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persist_err(account_id, e))?;
        tracing::debug!(account_id, path = %path.display(), "Session saved");
        Ok(())
    }

    async fn clear(&self, account_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(account_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persist_err(account_id, e).into()),
        }
    }
}

/// In-memory store; can be told to reject writes
#[derive(Default)]
pub struct MemorySessionStore {
    blobs: Mutex<HashMap<String, String>>,
    reject_saves: bool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `save` fails with a persist error
    pub fn rejecting_saves() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            reject_saves: true,
        }
    }

    pub fn get(&self, account_id: &str) -> Option<String> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
    }

    pub fn insert(&self, account_id: &str, blob: &str) {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.to_string(), blob.to_string());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self.get(account_id))
    }

    async fn save(&self, account_id: &str, blob: &str) -> Result<()> {
        if self.reject_saves {
            return Err(persist_err(account_id, "store is read-only").into());
        }
        self.insert(account_id, blob);
        Ok(())
    }

    async fn clear(&self, account_id: &str) -> Result<()> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account_id);
        Ok(())
    }
}

/// Per-account mutual exclusion over the persisted session
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `account_id`'s session
    pub async fn lock(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_roundtrip_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"));

        assert!(store.load("1").await.unwrap().is_none());

        store.save("1", r#"[{"name":"sid"}]"#).await.unwrap();
        assert_eq!(
            store.load("1").await.unwrap().as_deref(),
            Some(r#"[{"name":"sid"}]"#)
        );

        store.clear("1").await.unwrap();
        assert!(store.load("1").await.unwrap().is_none());
        // Clearing twice is fine
        store.clear("1").await.unwrap();
    }

    #[test]
    fn test_file_names_are_hashed() {
        let store = FileSessionStore::new(PathBuf::from("/tmp/sessions"));
        let path = store.path_for("../../etc/passwd");
        assert_eq!(path.parent().unwrap(), Path::new("/tmp/sessions"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name.len(), 64 + ".json".len());
        assert_ne!(store.path_for("a"), store.path_for("b"));
    }

    #[tokio::test]
    async fn test_memory_store_rejecting_saves() {
        let store = MemorySessionStore::rejecting_saves();
        let err = store.save("1", "blob").await.unwrap_err();
        assert!(err.to_string().contains("Failed to persist session for account 1"));
    }

    #[tokio::test]
    async fn test_session_locks_serialize_same_account() {
        let locks = SessionLocks::new();
        let guard = locks.lock("1").await;

        let contended = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("1").await;
            })
        };

        // Other accounts are independent
        let _other = tokio::time::timeout(Duration::from_millis(100), locks.lock("2"))
            .await
            .expect("different account must not block");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contended.is_finished());

        drop(guard);
        contended.await.unwrap();
    }
}
