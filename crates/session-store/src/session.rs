use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use session_crypto::KeyPair;

/// A finalized, persistable session: the long-lived session channel, the
/// local keypair, the peer's public key, and an absolute expiry.
///
/// Owned by exactly one peer client instance at a time; mutated only by the
/// owning peer.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub channel: String,
    pub key_pair: KeyPair,
    pub their_public_key: Vec<u8>,
    /// Absolute wall-clock milliseconds.
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

/// On-wire/on-disk form: keys are base64, per the persisted KVStore contract.
#[derive(Serialize, Deserialize)]
struct SessionDto {
    id: String,
    channel: String,
    public_key_b64: String,
    private_key_b64: String,
    their_public_key_b64: String,
    expires_at: i64,
}

impl Session {
    pub(crate) fn to_json(&self) -> String {
        let dto = SessionDto {
            id: self.id.clone(),
            channel: self.channel.clone(),
            public_key_b64: STANDARD.encode(&self.key_pair.public_key),
            private_key_b64: STANDARD.encode(self.key_pair.private_key()),
            their_public_key_b64: STANDARD.encode(&self.their_public_key),
            expires_at: self.expires_at,
        };
        serde_json::to_string(&dto).expect("SessionDto serialises infallibly")
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self, SessionParseError> {
        let dto: SessionDto = serde_json::from_str(raw)?;
        let public_key = STANDARD.decode(dto.public_key_b64)?;
        let private_key = STANDARD.decode(dto.private_key_b64)?;
        let their_public_key = STANDARD.decode(dto.their_public_key_b64)?;
        Ok(Session {
            id: dto.id,
            channel: dto.channel,
            key_pair: KeyPair::new(public_key, private_key),
            their_public_key,
            expires_at: dto.expires_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionParseError {
    #[error("malformed session JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed base64 in persisted session: {0}")]
    Base64(#[from] base64::DecodeError),
}
