use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker link is down")]
    Disconnected,
    #[error("broker rejected publication: {0}")]
    PublishFailed(String),
    #[error("broker rejected subscription: {0}")]
    SubscribeFailed(String),
    #[error("broker history fetch failed: {0}")]
    HistoryFailed(String),
}

/// Events a `Broker` emits. `Subscribed { recovered: false }` tells the
/// envelope/dedup layer it must call `history` explicitly ("Recovery
/// on fresh subscription").
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Connecting,
    Connected,
    Disconnected,
    Error { message: String },
    Publication { channel: String, raw: String },
    Subscribed { channel: String, recovered: bool },
}

/// Contract the core consumes from a channel-based pub/sub broker.
///
/// The broker is assumed to provide ordered delivery per channel and
/// at-least-once relay semantics; it is not trusted to read or mutate
/// payloads, so every method here deals in opaque strings.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// After this resolves, the adapter MUST deliver (via the event
    /// stream) at least every publication retained in history since the
    /// last known position, plus all subsequent publications.
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;

    async fn publish(&self, channel: &str, raw: &str) -> Result<(), BrokerError>;

    /// Up to `limit` most recent publications on `channel`, oldest-first.
    async fn history(&self, channel: &str, limit: usize) -> Result<Vec<String>, BrokerError>;

    /// Unsubscribe locally and drop any per-channel client state.
    async fn clear(&self, channel: &str) -> Result<(), BrokerError>;

    /// A fresh receiver over this broker's event stream. Each call returns
    /// an independent receiver (broadcast semantics): callers only observe
    /// events emitted after they start listening.
    fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent>;
}
