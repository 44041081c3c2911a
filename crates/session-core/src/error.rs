//! The closed error taxonomy every fallible operation in this
//! crate surfaces through. Adapter crates keep their own narrow error
//! types (`KvError`, `BrokerError`, `CryptoError`); each converts into a
//! `SessionError` variant at the point where it crosses into the core,
//! rather than one giant enum shared by every crate.

use session_crypto::CryptoError;
use session_store::{KvError, SessionStoreError};
use session_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session has expired")]
    SessionExpired,

    #[error("session not found")]
    SessionNotFound,

    #[error("session is in the wrong state for this operation")]
    SessionInvalidState,

    #[error("failed to persist session: {0}")]
    SessionSaveFailed(#[from] SessionStoreError),

    #[error("transport is disconnected")]
    TransportDisconnected,

    #[error("publish failed after max retries")]
    TransportPublishFailed,

    #[error("subscribe failed: {0}")]
    TransportSubscribeFailed(String),

    #[error("history fetch failed: {0}")]
    TransportHistoryFailed(String),

    #[error("envelope or protocol message parse failed: {0}")]
    TransportParseFailed(String),

    #[error("reconnect failed: {0}")]
    TransportReconnectFailed(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid peer public key")]
    InvalidKey,

    #[error("session request has expired")]
    RequestExpired,

    #[error("incorrect OTP")]
    OtpIncorrect,

    #[error("maximum OTP attempts reached")]
    OtpMaxAttemptsReached,

    #[error("OTP entry window elapsed")]
    OtpEntryTimeout,

    #[error("key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => SessionError::TransportDisconnected,
            TransportError::PublishFailed => SessionError::TransportPublishFailed,
            TransportError::SubscribeFailed(m) => SessionError::TransportSubscribeFailed(m),
            TransportError::HistoryFailed(m) => SessionError::TransportHistoryFailed(m),
            TransportError::ParseFailed(m) => SessionError::TransportParseFailed(m),
            TransportError::ReconnectFailed(m) => SessionError::TransportReconnectFailed(m),
            TransportError::Kv(e) => SessionError::Kv(e),
        }
    }
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKey => SessionError::InvalidKey,
            CryptoError::DecryptionFailed => SessionError::DecryptionFailed,
            CryptoError::Base64Decode(_) => SessionError::DecryptionFailed,
        }
    }
}

/// A kind tag mirroring the closed error set, for hosts that want to match on
/// the error class without downcasting `SessionError` itself (e.g. to
/// decide whether to show `otp_required` again).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionExpired,
    SessionNotFound,
    SessionInvalidState,
    SessionSaveFailed,
    TransportDisconnected,
    TransportPublishFailed,
    TransportSubscribeFailed,
    TransportHistoryFailed,
    TransportParseFailed,
    TransportReconnectFailed,
    DecryptionFailed,
    InvalidKey,
    RequestExpired,
    OtpIncorrect,
    OtpMaxAttemptsReached,
    OtpEntryTimeout,
    Unknown,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::SessionExpired => ErrorKind::SessionExpired,
            SessionError::SessionNotFound => ErrorKind::SessionNotFound,
            SessionError::SessionInvalidState => ErrorKind::SessionInvalidState,
            SessionError::SessionSaveFailed(_) => ErrorKind::SessionSaveFailed,
            SessionError::TransportDisconnected => ErrorKind::TransportDisconnected,
            SessionError::TransportPublishFailed => ErrorKind::TransportPublishFailed,
            SessionError::TransportSubscribeFailed(_) => ErrorKind::TransportSubscribeFailed,
            SessionError::TransportHistoryFailed(_) => ErrorKind::TransportHistoryFailed,
            SessionError::TransportParseFailed(_) => ErrorKind::TransportParseFailed,
            SessionError::TransportReconnectFailed(_) => ErrorKind::TransportReconnectFailed,
            SessionError::DecryptionFailed => ErrorKind::DecryptionFailed,
            SessionError::InvalidKey => ErrorKind::InvalidKey,
            SessionError::RequestExpired => ErrorKind::RequestExpired,
            SessionError::OtpIncorrect => ErrorKind::OtpIncorrect,
            SessionError::OtpMaxAttemptsReached => ErrorKind::OtpMaxAttemptsReached,
            SessionError::OtpEntryTimeout => ErrorKind::OtpEntryTimeout,
            SessionError::Kv(_) => ErrorKind::Unknown,
            SessionError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}
