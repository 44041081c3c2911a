//! Events and host-interaction hooks crossing the BaseClient/host boundary.
//!
//! Events are delivered over a `tokio::sync::mpsc::UnboundedSender<ClientEvent>`
//! the host supplies at construction (mirroring the mailbox design the
//! transport layer already uses) rather than callback closures.

use async_trait::async_trait;

use crate::error::SessionError;
use session_proto::SessionRequest;

#[derive(Debug)]
pub enum ClientEvent {
    /// Emitted by an initiator once it has generated the out-of-band
    /// `SessionRequest` a host renders as a QR code or deep link.
    SessionRequest(SessionRequest),
    /// Emitted by a responder once it has generated an OTP for the user to
    /// read and type into the initiator.
    DisplayOtp { otp: String, deadline_ms: i64 },
    Connected,
    Disconnected,
    /// An application payload, already decrypted, ready for the host.
    Message(serde_json::Value),
    /// Non-fatal, locally recovered error (propagation policy) or a
    /// terminal error the host should otherwise be aware of.
    Error(SessionError),
}

/// The host-side outcome of one OTP attempt prompt. Represents the
/// "wrong but retryable" vs. "wrong and terminal" distinction as a plain
/// result type rather than exception-vs-return.
pub enum OtpDecision {
    Submit(String),
    Cancel,
}

/// Host capability: prompt the user for an OTP (or let them cancel), given
/// the deadline by which the OTP must be entered. Only consulted in
/// untrusted-mode initiator handshakes.
#[async_trait]
pub trait OtpPrompt: Send + Sync {
    async fn prompt(&self, deadline_ms: i64) -> OtpDecision;
}
