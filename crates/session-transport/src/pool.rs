//! Explicit, scoped replacement for the source's process-wide shared-broker
//! map. A `BrokerPool` reference-counts
//! handles onto one physical [`Broker`]; the physical link is torn down only
//! when the last handle drops. Hosts that want isolation simply construct
//! one pool per transport instead of sharing one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerError};

struct BrokerPoolInner {
    broker: Arc<dyn Broker>,
    refs: AtomicUsize,
    reconnect_lock: AsyncMutex<()>,
    // Bumped after each completed reconnect cycle so a concurrent caller
    // that only just acquired the lock can tell whether the work it was
    // waiting on already happened.
    epoch: AtomicU64,
}

/// Shared ownership of one physical broker connection.
#[derive(Clone)]
pub struct BrokerPool {
    inner: Arc<BrokerPoolInner>,
}

impl BrokerPool {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            inner: Arc::new(BrokerPoolInner {
                broker,
                refs: AtomicUsize::new(0),
                reconnect_lock: AsyncMutex::new(()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Take a reference-counted handle. The physical broker connects once,
    /// on the first handle's first `connect()`.
    pub fn acquire(&self) -> BrokerPoolHandle {
        self.inner.refs.fetch_add(1, Ordering::SeqCst);
        BrokerPoolHandle { pool: self.clone() }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.inner.broker.clone()
    }

    /// Single-flight reconnect: disconnect then connect exactly once per
    /// cycle, no matter how many callers invoke this concurrently. A caller
    /// that arrives while a cycle is already running waits for the lock,
    /// observes the epoch already advanced past what it captured, and
    /// returns without repeating the work.
    pub async fn reconnect(&self) -> Result<(), BrokerError> {
        let observed_epoch = self.inner.epoch.load(Ordering::SeqCst);
        let _guard = self.inner.reconnect_lock.lock().await;
        if self.inner.epoch.load(Ordering::SeqCst) != observed_epoch {
            debug!(target: "session_transport", "reconnect already completed by another caller");
            return Ok(());
        }
        self.inner.broker.disconnect().await?;
        self.inner.broker.connect().await?;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        if self.inner.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            let broker = self.inner.broker.clone();
            tokio::spawn(async move {
                if let Err(err) = broker.disconnect().await {
                    warn!(target: "session_transport", error = %err, "error disconnecting broker on last pool reference drop");
                }
            });
        }
    }
}

/// A scoped reference into a [`BrokerPool`]. Dropping the last outstanding
/// handle tears down the physical connection.
pub struct BrokerPoolHandle {
    pool: BrokerPool,
}

impl BrokerPoolHandle {
    pub fn broker(&self) -> Arc<dyn Broker> {
        self.pool.broker()
    }

    pub fn pool(&self) -> BrokerPool {
        self.pool.clone()
    }
}

impl Drop for BrokerPoolHandle {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_broker::{InMemoryBroker, InMemoryBrokerHub};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_reconnects_complete_without_error() {
        let hub = InMemoryBrokerHub::new();
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        broker.connect().await.unwrap();
        let pool = BrokerPool::new(broker);
        let _h1 = pool.acquire();
        let _h2 = pool.acquire();

        let a = pool.clone();
        let b = pool.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.reconnect().await }),
            tokio::spawn(async move { b.reconnect().await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
    }

    #[tokio::test]
    async fn last_handle_drop_disconnects_physical_broker() {
        let hub = InMemoryBrokerHub::new();
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
        broker.connect().await.unwrap();
        let pool = BrokerPool::new(broker.clone());
        let h1 = pool.acquire();
        let h2 = pool.acquire();
        drop(h1);
        assert!(broker.publish("c", "still-up").await.is_ok());
        drop(h2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.publish("c", "down-now").await.is_err());
    }
}
