#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("publish failed after max retries")]
    PublishFailed,

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("history fetch failed: {0}")]
    HistoryFailed(String),

    #[error("envelope parse failed: {0}")]
    ParseFailed(String),

    #[error("reconnect failed: {0}")]
    ReconnectFailed(String),

    #[error(transparent)]
    Kv(#[from] session_store::KvError),
}
