//! session-proto — wire types and envelope serialisation for the relayed
//! session protocol.
//!
//! Every value on the broker is UTF-8 JSON. This crate owns the handful of
//! shapes the wire is allowed to take; it does not know about brokers,
//! stores, or cryptography.
//!
//! # Modules
//! - `envelope` — the transport-level `{clientId, nonce, payload}` wrapper.
//! - `message`  — the protocol messages carried *inside* an envelope payload.
//! - `request`  — the out-of-band `SessionRequest` (QR / deep-link).

pub mod envelope;
pub mod message;
pub mod request;

pub use envelope::{Envelope, EnvelopeError};
pub use message::{HandshakeOfferPayload, ProtocolMessage};
pub use request::{SessionMode, SessionRequest};
