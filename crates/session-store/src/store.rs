use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{KvError, SessionStoreError};
use crate::kv::KeyValueStore;
use crate::session::Session;

const MASTER_LIST_KEY: &str = "sessions:master-list";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

/// Persists `Session`s through a `KeyValueStore`, plus a `sessions:master-list`
/// index (the KVStore contract has no `list`).
///
/// The constructor runs garbage collection before returning: every id in the
/// master list is resolved through `get`, which deletes anything expired or
/// corrupt. This is load-bearing — every other invariant about the master
/// list depends on GC having already run once per process.
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    master_list_lock: Mutex<()>,
}

impl SessionStore {
    pub async fn create(kv: Arc<dyn KeyValueStore>) -> Result<Self, SessionStoreError> {
        let store = Self {
            kv,
            master_list_lock: Mutex::new(()),
        };
        store.gc().await?;
        Ok(store)
    }

    async fn gc(&self) -> Result<(), SessionStoreError> {
        let ids = self.read_master_list().await?;
        debug!(target: "session_store", count = ids.len(), "running startup GC sweep");
        for id in ids {
            // `get` deletes expired/corrupt entries as a side effect.
            let _ = self.get(&id).await?;
        }
        Ok(())
    }

    /// Fails `SaveFailed` if `expires_at` is not strictly in the future.
    pub async fn set(&self, session: &Session) -> Result<(), SessionStoreError> {
        if session.expires_at <= now_ms() {
            return Err(SessionStoreError::SaveFailed);
        }
        self.kv
            .set(&session_key(&session.id), &session.to_json())
            .await?;
        self.add_id_to_master_list(&session.id).await?;
        trace!(target: "session_store", session_id = %session.id, "session saved");
        Ok(())
    }

    /// `None` if missing, expired, or corrupt — each of those cases deletes
    /// the underlying entry (and its master-list id) before returning.
    pub async fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
        let raw = match self.kv.get(&session_key(id)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match Session::from_json(&raw) {
            Ok(session) if !session.is_expired(now_ms()) => Ok(Some(session)),
            Ok(_expired) => {
                self.delete(id).await?;
                Ok(None)
            }
            Err(_corrupt) => {
                self.delete(id).await?;
                Ok(None)
            }
        }
    }

    /// Every session the master list points to that survives `get`.
    pub async fn list(&self) -> Result<Vec<Session>, SessionStoreError> {
        let ids = self.read_master_list().await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        self.kv.delete(&session_key(id)).await?;
        self.remove_id_from_master_list(id).await?;
        Ok(())
    }

    // ── master-list index ───────────────────────────────────────────────

    async fn read_master_list_locked(&self) -> Result<Vec<String>, SessionStoreError> {
        match self.kv.get(MASTER_LIST_KEY).await? {
            // A corrupt index is treated as empty rather than surfaced: the
            // index is a cache over the authoritative per-session keys.
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    async fn write_master_list_locked(&self, ids: &[String]) -> Result<(), SessionStoreError> {
        let raw = serde_json::to_string(ids).map_err(KvError::Serialization)?;
        self.kv.set(MASTER_LIST_KEY, &raw).await?;
        Ok(())
    }

    async fn read_master_list(&self) -> Result<Vec<String>, SessionStoreError> {
        let _guard = self.master_list_lock.lock().await;
        self.read_master_list_locked().await
    }

    async fn add_id_to_master_list(&self, id: &str) -> Result<(), SessionStoreError> {
        let _guard = self.master_list_lock.lock().await;
        let mut ids = self.read_master_list_locked().await?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.write_master_list_locked(&ids).await?;
        }
        Ok(())
    }

    async fn remove_id_from_master_list(&self, id: &str) -> Result<(), SessionStoreError> {
        let _guard = self.master_list_lock.lock().await;
        let mut ids = self.read_master_list_locked().await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.write_master_list_locked(&ids).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKvStore;
    use session_crypto::KeyPair;

    fn sample_session(id: &str, expires_at: i64) -> Session {
        Session {
            id: id.to_string(),
            channel: format!("session:{id}"),
            key_pair: KeyPair::new(vec![0x02; 33], vec![7; 32]),
            their_public_key: vec![0x03; 33],
            expires_at,
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = SessionStore::create(kv).await.unwrap();
        let session = sample_session("s1", now_ms() + 60_000);
        store.set(&session).await.unwrap();

        let got = store.get("s1").await.unwrap().expect("present");
        assert_eq!(got.id, "s1");
    }

    #[tokio::test]
    async fn get_on_missing_id_is_none() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = SessionStore::create(kv).await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_rejects_non_future_expiry() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = SessionStore::create(kv).await.unwrap();
        let session = sample_session("s1", now_ms());
        assert!(matches!(
            store.set(&session).await,
            Err(SessionStoreError::SaveFailed)
        ));
    }

    #[tokio::test]
    async fn get_deletes_expired_entry_and_its_master_list_id() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = SessionStore::create(kv.clone()).await.unwrap();
        let session = sample_session("s1", now_ms() + 10);
        store.set(&session).await.unwrap();

        // Forge an already-expired blob directly through the kv, bypassing `set`'s guard.
        let mut expired = session.clone();
        expired.expires_at = now_ms() - 1;
        kv.set("session:s1", &expired.to_json()).await.unwrap();

        assert!(store.get("s1").await.unwrap().is_none());
        assert!(kv.get("session:s1").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn constructor_gc_removes_expired_sessions() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        {
            let store = SessionStore::create(kv.clone()).await.unwrap();
            store.set(&sample_session("live", now_ms() + 60_000)).await.unwrap();
        }
        // Forge an expired entry directly, then force it into the master list.
        kv.set(
            "session:stale",
            &sample_session("stale", now_ms() - 1).to_json(),
        )
        .await
        .unwrap();
        kv.set(MASTER_LIST_KEY, r#"["live","stale"]"#).await.unwrap();

        let store = SessionStore::create(kv.clone()).await.unwrap();
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "live");
        assert!(kv.get("session:stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_blob_and_master_list_entry() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = SessionStore::create(kv.clone()).await.unwrap();
        store.set(&sample_session("s1", now_ms() + 60_000)).await.unwrap();

        store.delete("s1").await.unwrap();

        assert!(store.get("s1").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_sets_preserve_master_list_integrity() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(SessionStore::create(kv).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let session = sample_session(&format!("s{i}"), now_ms() + 60_000);
                store.set(&session).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let sessions = store.list().await.unwrap();
        assert_eq!(sessions.len(), 20);
    }
}
