//! The transport-level envelope: `{"clientId":"<uuid>","nonce":<u64>,"payload":"<string>"}`.

use serde::{Deserialize, Serialize};

/// Wraps a single outbound/inbound unit of data on a broker channel.
///
/// `nonce` is a delivery-dedup counter, not a cryptographic nonce. `payload`
/// is opaque to this layer: it is either raw JSON (handshake-offer) or
/// ciphertext (everything on a session channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub nonce: u64,
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Envelope {
    pub fn new(client_id: impl Into<String>, nonce: u64, payload: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            nonce,
            payload: payload.into(),
        }
    }

    /// Serialise to the exact wire form: `{"clientId":...,"nonce":...,"payload":...}`.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("Envelope serialises infallibly")
    }

    /// Parse a raw broker publication. Any shape mismatch is `EnvelopeError::Parse`,
    /// which callers map to `TRANSPORT_PARSE_FAILED`.
    pub fn from_wire(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip() {
        let e = Envelope::new("client-a", 7, "ciphertext-blob");
        let wire = e.to_wire();
        let parsed = Envelope::from_wire(&wire).expect("parses");
        assert_eq!(e, parsed);
    }

    #[test]
    fn wire_shape_is_exact() {
        let e = Envelope::new("c1", 1, "p");
        let wire = e.to_wire();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["nonce"], 1);
        assert_eq!(value["payload"], "p");
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Envelope::from_wire("not json").is_err());
        assert!(Envelope::from_wire(r#"{"clientId":"x"}"#).is_err());
    }
}
