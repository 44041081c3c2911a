use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::KvError;
use crate::kv::KeyValueStore;

/// JSON-file-backed reference `KeyValueStore`, for simple long-lived local
/// processes that want persistence without embedding a database. The whole
/// map is read into memory at construction and rewritten on every mutation;
/// fine for the small, low-churn key set this protocol actually uses
/// (a handful of session/nonce/dedup entries), not intended as a
/// general-purpose store.
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileKvStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, KvError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(KvError::Io(e)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<(), KvError> {
        let raw = serde_json::to_string(entries)?;
        if let Some(parent) = Path::new(&self.path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut guard = self.entries.lock().await;
        guard.insert(key.to_string(), value.to_string());
        self.flush(&guard).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut guard = self.entries.lock().await;
        guard.remove(key);
        self.flush(&guard).await
    }
}
