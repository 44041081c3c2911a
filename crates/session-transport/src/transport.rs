//! The envelope & dedup layer - the hardest part of the core.
//!
//! Wraps outbound payloads into envelopes with monotonically assigned
//! nonces, drains them through a broker with bounded retry, and on the
//! inbound side deduplicates per (channel, sender) before handing payloads
//! to the host via [`TransportEvent::Message`] and a one-shot
//! [`ConfirmNonce`] acknowledger.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use session_proto::Envelope;
use session_store::KeyValueStore;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerError, BrokerEvent};
use crate::confirm::ConfirmNonce;
use crate::config::TransportConfig;
use crate::dedup::peek_last_nonce;
use crate::error::TransportError;
use crate::queue::QueueItem;
use crate::state::ConnectionState;

const CLIENT_ID_KEY: &str = "websocket-transport-client-id";

fn nonce_key(client_id: &str) -> String {
    format!("nonce:{client_id}")
}

/// Events the transport hands to its host (typically `session-core`'s
/// `BaseClient`) over an unbounded mailbox, mirroring the rest of this
/// codebase's async-notification style rather than callback closures.
#[derive(Debug)]
pub enum TransportEvent {
    Connecting,
    Connected,
    Disconnected,
    /// An accepted, deduplicated inbound envelope. `confirm` must be called
    /// once the host has durably processed `data`; until then the nonce is
    /// not advanced and a later history replay will redeliver it.
    Message {
        channel: String,
        data: String,
        confirm: ConfirmNonce,
    },
    Error(TransportError),
}

struct PendingPublish {
    item: QueueItem,
    attempt: u32,
}

/// The envelope/dedup transport. Generic over no broker type — the broker
/// is held as `Arc<dyn Broker>` so hosts can substitute a real network
/// adapter behind the same trait used by the in-memory reference one.
pub struct Transport {
    broker: Arc<dyn Broker>,
    kv: Arc<dyn KeyValueStore>,
    config: TransportConfig,
    client_id: String,
    state: SyncMutex<ConnectionState>,
    subscribed: DashMap<String, ()>,
    channel_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    nonce_lock: AsyncMutex<()>,
    queue: SyncMutex<VecDeque<QueueItem>>,
    queue_notify: Notify,
    events: mpsc::UnboundedSender<TransportEvent>,
    reconnect_lock: AsyncMutex<()>,
    reconnect_epoch: AtomicU64,
}

impl Transport {
    /// Resolves (creating if absent) the stable per-install `clientId`,
    /// spawns the broker-event pump and the outbound drain loop, and
    /// returns a handle ready for `connect()`.
    pub async fn new(
        broker: Arc<dyn Broker>,
        kv: Arc<dyn KeyValueStore>,
        config: TransportConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<Self>, TransportError> {
        let client_id = match kv.get(CLIENT_ID_KEY).await? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                kv.set(CLIENT_ID_KEY, &id).await?;
                id
            }
        };

        let transport = Arc::new(Self {
            broker,
            kv,
            config,
            client_id,
            state: SyncMutex::new(ConnectionState::Disconnected),
            subscribed: DashMap::new(),
            channel_locks: DashMap::new(),
            nonce_lock: AsyncMutex::new(()),
            queue: SyncMutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            events,
            reconnect_lock: AsyncMutex::new(()),
            reconnect_epoch: AtomicU64::new(0),
        });

        transport.clone().spawn_event_pump();
        transport.clone().spawn_drain_loop();

        Ok(transport)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Idempotent: a no-op if already connected.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        *self.state.lock() = ConnectionState::Connecting;
        let _ = self.events.send(TransportEvent::Connecting);
        self.broker.connect().await.map_err(|e| {
            *self.state.lock() = ConnectionState::Disconnected;
            debug!(target: "session_transport", error = %e, "broker connect failed");
            TransportError::Disconnected
        })?;
        // The broker's `Connected` event (observed by the pump task) flips
        // our state and wakes the drain loop; the explicit set here covers
        // reference brokers that emit no further events after a no-op connect.
        *self.state.lock() = ConnectionState::Connected;
        self.queue_notify.notify_one();
        Ok(())
    }

    /// Idempotent. Cancels any still-queued outbound items: their futures
    /// resolve `Ok(false)` per the transport's cancellation contract.
    pub async fn disconnect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        *self.state.lock() = ConnectionState::Disconnected;
        let drained: Vec<QueueItem> = {
            let mut q = self.queue.lock();
            q.drain(..).collect()
        };
        for item in drained {
            let _ = item.resolver.send(Ok(false));
        }
        self.broker.disconnect().await.map_err(|e| {
            debug!(target: "session_transport", error = %e, "broker disconnect failed");
            TransportError::Disconnected
        })?;
        let _ = self.events.send(TransportEvent::Disconnected);
        Ok(())
    }

    /// Heals a one-sided partition: disconnects and reconnects the physical
    /// broker, then forces a fresh `broker.subscribe()` for every channel
    /// currently in `self.subscribed` so each one sees a new
    /// `Subscribed{recovered:false}` and runs history-driven recovery
    /// (`recover_channel`) exactly as it would on first subscribe.
    ///
    /// Single-flight like `BrokerPool::reconnect`: concurrent callers all
    /// observe the epoch bumped by whichever one actually does the work and
    /// return without repeating it.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), TransportError> {
        let observed_epoch = self.reconnect_epoch.load(Ordering::SeqCst);
        let _guard = self.reconnect_lock.lock().await;
        if self.reconnect_epoch.load(Ordering::SeqCst) != observed_epoch {
            debug!(target: "session_transport", "reconnect already completed by another caller");
            return Ok(());
        }

        let channels: Vec<String> = self.subscribed.iter().map(|e| e.key().clone()).collect();

        *self.state.lock() = ConnectionState::Connecting;
        let _ = self.events.send(TransportEvent::Connecting);
        self.broker
            .disconnect()
            .await
            .map_err(|e| TransportError::ReconnectFailed(e.to_string()))?;
        self.broker
            .connect()
            .await
            .map_err(|e| TransportError::ReconnectFailed(e.to_string()))?;
        *self.state.lock() = ConnectionState::Connected;
        self.queue_notify.notify_one();

        for channel in channels {
            self.broker
                .subscribe(&channel)
                .await
                .map_err(|e| TransportError::ReconnectFailed(e.to_string()))?;
        }

        self.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Idempotent. The subscription takes effect on the current or next
    /// `connected` edge (the broker adapter's own contract).
    pub async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        if self.subscribed.contains_key(channel) {
            return Ok(());
        }
        self.broker
            .subscribe(channel)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        self.subscribed.insert(channel.to_string(), ());
        Ok(())
    }

    /// Unsubscribe and delete this channel's persisted dedup state.
    pub async fn clear(&self, channel: &str) -> Result<(), TransportError> {
        self.subscribed.remove(channel);
        self.channel_locks.remove(channel);
        self.broker
            .clear(channel)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let key = crate::dedup::dedup_key(&self.client_id, channel);
        self.kv.delete(&key).await?;
        Ok(())
    }

    /// Assigns the next nonce (persisted, monotonic across all channels),
    /// enqueues the envelope, and resolves once the broker has accepted the
    /// publication (`true`), the transport disconnected first (`false`), or
    /// rejects with `PublishFailed` after `max_retry` attempts.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<bool, TransportError> {
        let nonce = self.next_nonce().await?;
        let envelope = Envelope::new(self.client_id.clone(), nonce, payload);
        let raw = envelope.to_wire();

        let (tx, rx) = oneshot::channel();
        {
            let mut q = self.queue.lock();
            q.push_back(QueueItem {
                channel: channel.to_string(),
                raw,
                resolver: tx,
            });
        }
        self.queue_notify.notify_one();

        rx.await.unwrap_or(Ok(false))
    }

    async fn next_nonce(&self) -> Result<u64, TransportError> {
        let _guard = self.nonce_lock.lock().await;
        let key = nonce_key(&self.client_id);
        let last: u64 = match self.kv.get(&key).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => 0,
        };
        let next = last
            .checked_add(1)
            .ok_or_else(|| TransportError::ParseFailed("nonce overflow".to_string()))?;
        self.kv.set(&key, &next.to_string()).await?;
        Ok(next)
    }

    fn channel_lock(&self, channel: &str) -> Arc<AsyncMutex<()>> {
        self.channel_locks
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Shared inbound path for both live publications and history replay.
    /// Holds the per-channel delivery lock for as long as the message is
    /// unconfirmed, so the next inbound envelope on this channel can't even
    /// be dedup-checked until this one is durably acknowledged.
    async fn handle_inbound(&self, channel: &str, raw: &str) {
        let envelope = match Envelope::from_wire(raw) {
            Ok(e) => e,
            Err(e) => {
                warn!(target: "session_transport", channel, error = %e, "dropping malformed envelope");
                let _ = self
                    .events
                    .send(TransportEvent::Error(TransportError::ParseFailed(e.to_string())));
                return;
            }
        };

        if envelope.client_id == self.client_id {
            trace!(target: "session_transport", channel, "dropping self-authored envelope");
            return;
        }

        let lock = self.channel_lock(channel);
        let guard = lock.lock_owned().await;

        let last_nonce = match peek_last_nonce(&self.kv, &self.client_id, channel, &envelope.client_id).await {
            Ok(n) => n,
            Err(e) => {
                let _ = self.events.send(TransportEvent::Error(e));
                return;
            }
        };
        if envelope.nonce <= last_nonce {
            trace!(target: "session_transport", channel, sender = %envelope.client_id, nonce = envelope.nonce, last_nonce, "dropping duplicate envelope");
            return;
        }

        let confirm = ConfirmNonce::new(
            self.kv.clone(),
            self.client_id.clone(),
            envelope.client_id.clone(),
            channel.to_string(),
            envelope.nonce,
            guard,
        );
        let _ = self.events.send(TransportEvent::Message {
            channel: channel.to_string(),
            data: envelope.payload,
            confirm,
        });
    }

    /// "Recovery on fresh subscription": fetch history and feed every
    /// entry through the same inbound path, oldest-first, exactly as if it
    /// had been live-delivered.
    async fn recover_channel(&self, channel: &str) {
        match self.broker.history(channel, self.config.history_fetch_limit).await {
            Ok(entries) => {
                debug!(target: "session_transport", channel, count = entries.len(), "replaying channel history");
                for raw in entries {
                    self.handle_inbound(channel, &raw).await;
                }
            }
            Err(BrokerError::Disconnected) => {
                // Non-fatal per spec: a connection closed mid-fetch is silent.
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(TransportEvent::Error(TransportError::HistoryFailed(e.to_string())));
            }
        }
    }

    fn spawn_event_pump(self: Arc<Self>) {
        let mut rx = self.broker.subscribe_events();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    BrokerEvent::Connecting => {
                        *self.state.lock() = ConnectionState::Connecting;
                        let _ = self.events.send(TransportEvent::Connecting);
                    }
                    BrokerEvent::Connected => {
                        *self.state.lock() = ConnectionState::Connected;
                        let _ = self.events.send(TransportEvent::Connected);
                        self.queue_notify.notify_one();
                    }
                    BrokerEvent::Disconnected => {
                        *self.state.lock() = ConnectionState::Disconnected;
                        let _ = self.events.send(TransportEvent::Disconnected);
                    }
                    BrokerEvent::Error { message } => {
                        let _ = self
                            .events
                            .send(TransportEvent::Error(TransportError::SubscribeFailed(message)));
                    }
                    BrokerEvent::Publication { channel, raw } => {
                        self.handle_inbound(&channel, &raw).await;
                    }
                    BrokerEvent::Subscribed { channel, recovered } => {
                        if !recovered {
                            self.recover_channel(&channel).await;
                        }
                    }
                }
            }
        });
    }

    fn spawn_drain_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if self.state() != ConnectionState::Connected {
                    self.queue_notify.notified().await;
                    continue;
                }
                let next = self.queue.lock().pop_front();
                let item = match next {
                    Some(item) => item,
                    None => {
                        self.queue_notify.notified().await;
                        continue;
                    }
                };
                self.drain_one(item).await;
            }
        });
    }

    async fn drain_one(&self, item: QueueItem) {
        let mut pending = PendingPublish { item, attempt: 0 };
        loop {
            if self.state() != ConnectionState::Connected {
                let _ = pending.item.resolver.send(Ok(false));
                return;
            }
            match self.broker.publish(&pending.item.channel, &pending.item.raw).await {
                Ok(()) => {
                    let _ = pending.item.resolver.send(Ok(true));
                    return;
                }
                Err(e) => {
                    pending.attempt += 1;
                    if pending.attempt >= self.config.max_retry {
                        warn!(target: "session_transport", channel = %pending.item.channel, attempts = pending.attempt, error = %e, "publish exhausted retries");
                        let _ = pending.item.resolver.send(Err(TransportError::PublishFailed));
                        return;
                    }
                    let delay = self.config.base_delay * 2u32.pow(pending.attempt - 1);
                    trace!(target: "session_transport", channel = %pending.item.channel, attempt = pending.attempt, delay_ms = delay.as_millis() as u64, "retrying publish");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Channels currently subscribed through this transport, for diagnostics/tests.
pub fn subscribed_channels(transport: &Transport) -> HashSet<String> {
    transport.subscribed.iter().map(|e| e.key().clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_broker::{InMemoryBroker, InMemoryBrokerHub};
    use session_store::MemoryKvStore;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn new_pair() -> (Arc<Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let hub = InMemoryBrokerHub::new();
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Transport::new(broker, kv, TransportConfig::default(), tx)
            .await
            .unwrap();
        (transport, rx)
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> (String, String, ConfirmNonce) {
        loop {
            match timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap() {
                TransportEvent::Message { channel, data, confirm } => return (channel, data, confirm),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn publish_resolves_true_once_connected() {
        let (transport, _rx) = new_pair().await;
        transport.connect().await.unwrap();
        let ok = transport.publish("c1", "hello").await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn publish_while_never_connected_resolves_false_on_disconnect() {
        let (transport, _rx) = new_pair().await;
        let transport2 = transport.clone();
        let handle = tokio::spawn(async move { transport2.publish("c1", "hello").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        let result = handle.await.unwrap().unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn two_transports_exchange_a_message_and_confirm() {
        let hub = InMemoryBrokerHub::new();
        let kv_a: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let kv_b: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let broker_a: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub.clone()));
        let broker_b: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        let a = Transport::new(broker_a, kv_a, TransportConfig::default(), tx_a).await.unwrap();
        let b = Transport::new(broker_b, kv_b, TransportConfig::default(), tx_b).await.unwrap();

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        a.subscribe("chan").await.unwrap();
        b.subscribe("chan").await.unwrap();

        a.publish("chan", "ping").await.unwrap();
        let (channel, data, confirm) = next_message(&mut rx_b).await;
        assert_eq!(channel, "chan");
        assert_eq!(data, "ping");
        confirm.confirm().await.unwrap();

        let _ = rx_a; // the sender never observes its own publication (self-dedup)
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped_until_confirmed_then_not_redelivered() {
        let hub = InMemoryBrokerHub::new();
        let kv_a: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let kv_b: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let broker_a: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub.clone()));
        let broker_b: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        let a = Transport::new(broker_a, kv_a, TransportConfig::default(), tx_a).await.unwrap();
        let b = Transport::new(broker_b, kv_b, TransportConfig::default(), tx_b).await.unwrap();

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        a.subscribe("chan").await.unwrap();
        b.subscribe("chan").await.unwrap();

        a.publish("chan", "once").await.unwrap();
        let (_, _, confirm) = next_message(&mut rx_b).await;
        confirm.confirm().await.unwrap();

        // Replay the same raw envelope directly through the inbound path —
        // this is what a history replay on a fresh subscribe would do.
        let raw = Envelope::new(a.client_id().to_string(), 1, "once").to_wire();
        b.handle_inbound("chan", &raw).await;

        let got = timeout(Duration::from_millis(200), rx_b.recv()).await;
        assert!(got.is_err(), "duplicate must not be redelivered to the application");
    }

    #[tokio::test]
    async fn disconnected_state_starts_disconnected_and_flips_on_connect() {
        let (transport, _rx) = new_pair().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.connect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn nonces_are_contiguous_and_strictly_increasing() {
        let (transport, _rx) = new_pair().await;
        transport.connect().await.unwrap();
        for _ in 0..5 {
            transport.publish("c1", "x").await.unwrap();
        }
        let kv_value = transport
            .kv
            .get(&nonce_key(transport.client_id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kv_value, "5");
    }

    #[tokio::test]
    async fn clear_deletes_persisted_dedup_state() {
        let hub = InMemoryBrokerHub::new();
        let kv_a: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let kv_b: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let broker_a: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub.clone()));
        let broker_b: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        let a = Transport::new(broker_a, kv_a, TransportConfig::default(), tx_a).await.unwrap();
        let b = Transport::new(broker_b, kv_b.clone(), TransportConfig::default(), tx_b).await.unwrap();

        a.connect().await.unwrap();
        b.connect().await.unwrap();
        a.subscribe("chan").await.unwrap();
        b.subscribe("chan").await.unwrap();
        a.publish("chan", "x").await.unwrap();
        let (_, _, confirm) = next_message(&mut rx_b).await;
        confirm.confirm().await.unwrap();

        let key = crate::dedup::dedup_key(b.client_id(), "chan");
        assert!(kv_b.get(&key).await.unwrap().is_some());

        b.clear("chan").await.unwrap();
        assert!(kv_b.get(&key).await.unwrap().is_none());
    }
}
