//! Persistence of in-flight job tokens.
//!
//! A token is the only handle on a backend job. Saving it while the job
//! is polling lets a restarted process pick the job up again with
//! [`JobTracker::resume_from_token`](crate::JobTracker::resume_from_token)
//! instead of resubmitting (and paying for) the same generation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use apollo_core::types::{SlotKey, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::TrackerError;

/// Everything needed to resume polling a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedToken {
    pub token: String,
    /// The original submission, kept so a resumed job can be retried.
    pub payload: Value,
    /// When the job was first submitted. Counts against the maximum wait.
    pub created_at: Timestamp,
}

/// Keyed storage for at most one persisted token per slot.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store `token` for `slot`, replacing any previous one.
    async fn save(&self, slot: &str, token: &PersistedToken) -> Result<(), TrackerError>;

    async fn load(&self, slot: &str) -> Result<Option<PersistedToken>, TrackerError>;

    /// Remove the token for `slot`. Clearing an empty slot is not an error.
    async fn clear(&self, slot: &str) -> Result<(), TrackerError>;

    /// Every stored token, ordered by slot.
    async fn list(&self) -> Result<Vec<(SlotKey, PersistedToken)>, TrackerError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Tokens do not survive a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<BTreeMap<SlotKey, PersistedToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, slot: &str, token: &PersistedToken) -> Result<(), TrackerError> {
        self.tokens
            .write()
            .await
            .insert(slot.to_string(), token.clone());
        Ok(())
    }

    async fn load(&self, slot: &str) -> Result<Option<PersistedToken>, TrackerError> {
        Ok(self.tokens.read().await.get(slot).cloned())
    }

    async fn clear(&self, slot: &str) -> Result<(), TrackerError> {
        self.tokens.write().await.remove(slot);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(SlotKey, PersistedToken)>, TrackerError> {
        Ok(self
            .tokens
            .read()
            .await
            .iter()
            .map(|(slot, token)| (slot.clone(), token.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Store backed by a single JSON document mapping slot to token.
///
/// Writes go to a sibling `.tmp` file that is then renamed over the
/// document, so a crash mid-write leaves the previous version intact.
pub struct FileTokenStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ---- private helpers ----

    /// Read the document. A missing file is an empty store.
    async fn read_all(&self) -> Result<BTreeMap<SlotKey, PersistedToken>, TrackerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(store_error(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| store_error(&self.path, e))
    }

    async fn write_all(&self, tokens: &BTreeMap<SlotKey, PersistedToken>) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error(parent, e))?;
        }

        let bytes = serde_json::to_vec_pretty(tokens).map_err(|e| store_error(&self.path, e))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_error(&self.path, e))
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Store(format!("{}: {e}", path.display()))
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, slot: &str, token: &PersistedToken) -> Result<(), TrackerError> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read_all().await?;
        tokens.insert(slot.to_string(), token.clone());
        self.write_all(&tokens).await
    }

    async fn load(&self, slot: &str) -> Result<Option<PersistedToken>, TrackerError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(slot))
    }

    async fn clear(&self, slot: &str) -> Result<(), TrackerError> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read_all().await?;
        if tokens.remove(slot).is_some() {
            self.write_all(&tokens).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(SlotKey, PersistedToken)>, TrackerError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn saved(token: &str) -> PersistedToken {
        PersistedToken {
            token: token.to_string(),
            payload: json!({"business": "bakery"}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_store_replaces_per_slot() {
        let store = MemoryTokenStore::new();
        store.save("hooks", &saved("t1")).await.unwrap();
        store.save("hooks", &saved("t2")).await.unwrap();
        store.save("faq", &saved("t3")).await.unwrap();

        assert_eq!(store.load("hooks").await.unwrap().unwrap().token, "t2");
        let slots: Vec<_> = store.list().await.unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(slots, vec!["faq", "hooks"]);

        store.clear("hooks").await.unwrap();
        store.clear("hooks").await.unwrap();
        assert!(store.load("hooks").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("tokens.json");

        let store = FileTokenStore::new(&path);
        assert!(store.list().await.unwrap().is_empty());
        let token = saved("t1");
        store.save("ad_copy", &token).await.unwrap();
        drop(store);

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.load("ad_copy").await.unwrap(), Some(token));

        reopened.clear("ad_copy").await.unwrap();
        assert!(reopened.list().await.unwrap().is_empty());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileTokenStore::new(&path);
        assert_matches!(store.load("hooks").await, Err(TrackerError::Store(_)));
    }
}
