//! Protocol messages carried inside an envelope's `payload`, once unwrapped
//! (and, on a session channel, decrypted).

use serde::{Deserialize, Serialize};

/// `{channelId, publicKeyB64, otp?, deadline?}` — `otp`/`deadline` are present
/// iff the handshake mode is `untrusted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeOfferPayload {
    pub channel_id: String,
    pub public_key_b64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,
}

/// The closed set of messages that travel inside an envelope payload.
///
/// `HandshakeOffer` on the handshake channel is carried unencrypted; every
/// other variant, when it appears on a session channel, has already been
/// decrypted by the time it reaches this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProtocolMessage {
    HandshakeOffer { payload: HandshakeOfferPayload },
    HandshakeAck,
    Message { payload: serde_json::Value },
}

impl ProtocolMessage {
    pub fn message(payload: serde_json::Value) -> Self {
        ProtocolMessage::Message { payload }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ProtocolMessage serialises infallibly")
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_offer_untrusted_wire_shape() {
        let msg = ProtocolMessage::HandshakeOffer {
            payload: HandshakeOfferPayload {
                channel_id: "chan-1".into(),
                public_key_b64: "Zm9v".into(),
                otp: Some("000123".into()),
                deadline: Some(1_700_000_000_000),
            },
        };
        let json = msg.to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "handshake-offer");
        assert_eq!(value["payload"]["channelId"], "chan-1");
        assert_eq!(value["payload"]["otp"], "000123");
    }

    #[test]
    fn handshake_offer_trusted_omits_otp_fields() {
        let msg = ProtocolMessage::HandshakeOffer {
            payload: HandshakeOfferPayload {
                channel_id: "chan-1".into(),
                public_key_b64: "Zm9v".into(),
                otp: None,
                deadline: None,
            },
        };
        let json = msg.to_json();
        assert!(!json.contains("otp"));
        assert!(!json.contains("deadline"));
    }

    #[test]
    fn handshake_ack_roundtrip() {
        let msg = ProtocolMessage::HandshakeAck;
        let json = msg.to_json();
        assert_eq!(json, r#"{"type":"handshake-ack"}"#);
        assert_eq!(ProtocolMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn message_roundtrip() {
        let msg = ProtocolMessage::message(serde_json::json!({"method": "ping"}));
        let json = msg.to_json();
        let parsed = ProtocolMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn otp_leading_zeros_preserved_as_string() {
        let msg = ProtocolMessage::HandshakeOffer {
            payload: HandshakeOfferPayload {
                channel_id: "c".into(),
                public_key_b64: "x".into(),
                otp: Some("000123".into()),
                deadline: Some(0),
            },
        };
        match ProtocolMessage::from_json(&msg.to_json()).unwrap() {
            ProtocolMessage::HandshakeOffer { payload } => {
                assert_eq!(payload.otp.as_deref(), Some("000123"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
