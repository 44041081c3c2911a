use async_trait::async_trait;

use crate::error::KvError;

/// Capability the host supplies: async get/set/delete of opaque string
/// blobs, keyed by opaque strings. No `list` is assumed — anything that
/// needs enumeration (the `SessionStore`) maintains its own index.
///
/// Calls on distinct keys must be independent; calls on the same key must
/// be linearizable. No ordering guarantee is made across keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
}
