use std::collections::HashMap;
use std::sync::Arc;

use session_store::KeyValueStore;

use crate::error::TransportError;

pub(crate) fn dedup_key(self_client_id: &str, channel: &str) -> String {
    format!("latestNonces:{self_client_id}:{channel}")
}

/// `lastNonce[channel][sender]`, `0` if never seen. Read-only: does not
/// advance the persisted value (that's [`crate::confirm::ConfirmNonce::confirm`]'s job).
pub(crate) async fn peek_last_nonce(
    kv: &Arc<dyn KeyValueStore>,
    self_client_id: &str,
    channel: &str,
    sender_client_id: &str,
) -> Result<u64, TransportError> {
    let key = dedup_key(self_client_id, channel);
    let last_nonces: HashMap<String, u64> = match kv.get(&key).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        None => HashMap::new(),
    };
    Ok(last_nonces.get(sender_client_id).copied().unwrap_or(0))
}
