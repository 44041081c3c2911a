//! `SessionRequest` — the out-of-band payload carried by a QR code or deep
//! link from initiator to responder.

use serde::{Deserialize, Serialize};

use crate::message::ProtocolMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Trusted,
    Untrusted,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Untrusted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub id: String,
    pub mode: SessionMode,
    /// The handshake channel, e.g. `handshake:<uuid>`.
    pub channel: String,
    pub public_key_b64: String,
    /// Wall-clock milliseconds.
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<ProtocolMessage>,
}

impl SessionRequest {
    /// `expiresAt == now` counts as already expired (boundary behavior).
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("SessionRequest serialises infallibly")
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let req = SessionRequest {
            id: "id".into(),
            mode: SessionMode::Trusted,
            channel: "handshake:x".into(),
            public_key_b64: "x".into(),
            expires_at: 1000,
            initial_message: None,
        };
        assert!(req.is_expired(1000));
        assert!(req.is_expired(1001));
        assert!(!req.is_expired(999));
    }

    #[test]
    fn wire_shape_matches_spec() {
        let req = SessionRequest {
            id: "abc".into(),
            mode: SessionMode::Untrusted,
            channel: "handshake:abc".into(),
            public_key_b64: "Zm9v".into(),
            expires_at: 42,
            initial_message: Some(ProtocolMessage::message(serde_json::json!({"x": 1}))),
        };
        let json = req.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mode"], "untrusted");
        assert_eq!(value["channel"], "handshake:abc");
        assert_eq!(value["initialMessage"]["type"], "message");
    }

    #[test]
    fn initial_message_omitted_when_absent() {
        let req = SessionRequest {
            id: "abc".into(),
            mode: SessionMode::Trusted,
            channel: "handshake:abc".into(),
            public_key_b64: "Zm9v".into(),
            expires_at: 42,
            initial_message: None,
        };
        assert!(!req.to_json().contains("initialMessage"));
    }
}
