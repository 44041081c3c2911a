//! Process-local reference `Broker`: a shared [`InMemoryBrokerHub`] plays the
//! role of the untrusted relay, and each [`InMemoryBroker`] handle plays the
//! role of one peer's link into it. Multiple handles sharing one hub can
//! exchange publications exactly like two clients of a real broker; a
//! handle's link can additionally be synthetically partitioned for tests
//! that need to exercise disconnect/recovery behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::broker::{Broker, BrokerError, BrokerEvent};

const HUB_EVENT_CAPACITY: usize = 1024;
const DEFAULT_MAX_HISTORY_PER_CHANNEL: usize = 1000;

/// The shared exchange. Construct one `Arc<InMemoryBrokerHub>` per simulated
/// broker deployment and hand out an `InMemoryBroker` per peer.
pub struct InMemoryBrokerHub {
    history: DashMap<String, Mutex<VecDeque<String>>>,
    channel_tx: DashMap<String, broadcast::Sender<String>>,
    max_history_per_channel: usize,
}

impl InMemoryBrokerHub {
    pub fn new() -> Arc<Self> {
        Self::with_history_capacity(DEFAULT_MAX_HISTORY_PER_CHANNEL)
    }

    pub fn with_history_capacity(max_history_per_channel: usize) -> Arc<Self> {
        Arc::new(Self {
            history: DashMap::new(),
            channel_tx: DashMap::new(),
            max_history_per_channel,
        })
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        self.channel_tx
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(HUB_EVENT_CAPACITY).0)
            .clone()
    }

    fn record(&self, channel: &str, raw: &str) {
        let entry = self
            .history
            .entry(channel.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut guard = entry.lock();
        guard.push_back(raw.to_string());
        while guard.len() > self.max_history_per_channel {
            guard.pop_front();
        }
    }

    fn history_snapshot(&self, channel: &str, limit: usize) -> Vec<String> {
        match self.history.get(channel) {
            Some(entry) => {
                let guard = entry.lock();
                let len = guard.len();
                let start = len.saturating_sub(limit);
                guard.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }
}

struct Subscription {
    task: JoinHandle<()>,
}

/// One peer's link into an [`InMemoryBrokerHub`].
pub struct InMemoryBroker {
    hub: Arc<InMemoryBrokerHub>,
    link_up: Arc<AtomicBool>,
    event_tx: broadcast::Sender<BrokerEvent>,
    subscriptions: DashMap<String, Subscription>,
}

impl InMemoryBroker {
    pub fn new(hub: Arc<InMemoryBrokerHub>) -> Self {
        let (event_tx, _rx) = broadcast::channel(HUB_EVENT_CAPACITY);
        Self {
            hub,
            link_up: Arc::new(AtomicBool::new(false)),
            event_tx,
            subscriptions: DashMap::new(),
        }
    }

    /// Test-only: simulate a one-sided network partition. While
    /// partitioned, this handle's forwarding tasks stop delivering live
    /// publications, but the hub still records them, so a later
    /// history-driven recovery sees them.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.link_up.store(!partitioned, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.link_up.swap(true, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }
        let _ = self.event_tx.send(BrokerEvent::Connecting);
        let _ = self.event_tx.send(BrokerEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        if !self.link_up.swap(false, Ordering::SeqCst) {
            return Ok(()); // idempotent
        }
        let _ = self.event_tx.send(BrokerEvent::Disconnected);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        // Capture the hub receiver before announcing `Subscribed` so no
        // publication landing concurrently with this call can be missed.
        let mut hub_rx = self.hub.sender_for(channel).subscribe();
        let link_up = self.link_up.clone();
        let event_tx = self.event_tx.clone();
        let channel_owned = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                match hub_rx.recv().await {
                    Ok(raw) => {
                        if link_up.load(Ordering::SeqCst) {
                            let _ = event_tx.send(BrokerEvent::Publication {
                                channel: channel_owned.clone(),
                                raw,
                            });
                        } else {
                            trace!(target: "session_transport", channel = %channel_owned, "dropping live publication: link partitioned");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Replace any pre-existing forwarder for this channel.
        if let Some((_, old)) = self.subscriptions.remove(channel) {
            old.task.abort();
        }
        self.subscriptions
            .insert(channel.to_string(), Subscription { task });

        // This reference adapter conservatively always reports
        // `recovered = false`: it never claims to have replayed a gapless
        // history itself, so the dedup layer always falls back to the
        // explicit `history()` fetch, which is always safe.
        let _ = self.event_tx.send(BrokerEvent::Subscribed {
            channel: channel.to_string(),
            recovered: false,
        });
        Ok(())
    }

    async fn publish(&self, channel: &str, raw: &str) -> Result<(), BrokerError> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(BrokerError::Disconnected);
        }
        self.hub.record(channel, raw);
        Ok(())
    }

    async fn history(&self, channel: &str, limit: usize) -> Result<Vec<String>, BrokerError> {
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(BrokerError::Disconnected);
        }
        Ok(self.hub.history_snapshot(channel, limit))
    }

    async fn clear(&self, channel: &str) -> Result<(), BrokerError> {
        if let Some((_, sub)) = self.subscriptions.remove(channel) {
            sub.task.abort();
        }
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.event_tx.subscribe()
    }
}
