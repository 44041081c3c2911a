use std::collections::HashMap;
use std::sync::Arc;

use session_store::KeyValueStore;
use tokio::sync::Mutex as AsyncMutex;

use crate::dedup::dedup_key;
use crate::error::TransportError;

/// One-shot async acknowledger handed to the host alongside every delivered
/// message. Calling `confirm` persists the advanced nonce and releases the
/// per-channel delivery lock, letting the next message on this channel be
/// delivered. Not calling it (e.g. because processing failed) means the
/// message is redelivered on a later history replay — the "decrypt then
/// crash loses the nonce" bug class this exists to avoid.
///
/// Idempotent: the inner guard is consumed on first use, so a second call
/// is a documented no-op.
pub struct ConfirmNonce {
    kv: Arc<dyn KeyValueStore>,
    self_client_id: String,
    sender_client_id: String,
    channel: String,
    nonce: u64,
    // Holds the per-channel delivery lock for as long as this message is
    // unconfirmed. Taking it out and dropping it is what unblocks the next
    // delivery on the same channel.
    guard: AsyncMutex<Option<tokio::sync::OwnedMutexGuard<()>>>,
}

impl ConfirmNonce {
    pub(crate) fn new(
        kv: Arc<dyn KeyValueStore>,
        self_client_id: String,
        sender_client_id: String,
        channel: String,
        nonce: u64,
        guard: tokio::sync::OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            kv,
            self_client_id,
            sender_client_id,
            channel,
            nonce,
            guard: AsyncMutex::new(Some(guard)),
        }
    }

    pub async fn confirm(&self) -> Result<(), TransportError> {
        let mut slot = self.guard.lock().await;
        if slot.is_none() {
            return Ok(()); // already confirmed
        }

        let key = dedup_key(&self.self_client_id, &self.channel);
        let mut last_nonces: HashMap<String, u64> = match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => HashMap::new(),
        };
        let entry = last_nonces.entry(self.sender_client_id.clone()).or_insert(0);
        if self.nonce > *entry {
            *entry = self.nonce;
        }
        let raw = serde_json::to_string(&last_nonces)
            .map_err(|e| TransportError::ParseFailed(e.to_string()))?;
        self.kv.set(&key, &raw).await?;

        // Dropping the guard here, not before, means the persisted advance
        // happens-before the next message on this channel can be delivered.
        *slot = None;
        Ok(())
    }
}
