//! `BaseClient`: owns the transport, keymanager, session store, and
//! the current session; the single consumer of the transport's event
//! mailbox once the handshake has handed over a `Session`. Routes inbound
//! envelopes on the session channel to the host as decrypted application
//! messages and exposes `send_message`/`disconnect`/`resume`.
//!
//! `Initiator`/`Responder` are thin role-specific wrappers that run
//! the handshake, then construct one of these.

use std::sync::Arc;

use session_crypto::KeyManager;
use session_proto::ProtocolMessage;
use session_store::{Session, SessionStore};
use session_transport::{ConfirmNonce, Transport, TransportEvent};
use tokio::sync::{mpsc, RwLock};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::ClientEvent;
use crate::time::now_ms;

pub struct BaseClient {
    transport: Arc<Transport>,
    keymanager: Arc<dyn KeyManager>,
    sessionstore: Arc<SessionStore>,
    client_events: mpsc::UnboundedSender<ClientEvent>,
    session: RwLock<Session>,
}

impl BaseClient {
    /// Takes ownership of the transport's event mailbox and spawns the
    /// single task that will consume it for the client's lifetime.
    pub(crate) fn spawn(
        transport: Arc<Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        session: Session,
    ) -> Arc<Self> {
        let client = Arc::new(Self {
            transport,
            keymanager,
            sessionstore,
            client_events,
            session: RwLock::new(session),
        });
        let pump = client.clone();
        tokio::spawn(async move { pump.pump_loop(transport_events).await });
        client
    }

    /// Reattach to a session already persisted in the store (resume,
    /// exercised without repeating the handshake).
    pub(crate) async fn resume(
        transport: Arc<Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        session_id: &str,
    ) -> Result<Arc<Self>, SessionError> {
        let session = sessionstore
            .get(session_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;
        transport.connect().await?;
        transport.subscribe(&session.channel).await?;
        Ok(Self::spawn(transport, transport_events, keymanager, sessionstore, client_events, session))
    }

    async fn pump_loop(self: Arc<Self>, mut transport_events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::Connected => {
                    let _ = self.client_events.send(ClientEvent::Connected);
                }
                TransportEvent::Disconnected => {
                    let _ = self.client_events.send(ClientEvent::Disconnected);
                }
                TransportEvent::Connecting => {}
                TransportEvent::Error(e) => {
                    let _ = self.client_events.send(ClientEvent::Error(e.into()));
                }
                TransportEvent::Message { channel, data, confirm } => {
                    self.handle_message(&channel, data, confirm).await;
                }
            }
        }
    }

    async fn handle_message(&self, channel: &str, data: String, confirm: ConfirmNonce) {
        let session = self.session.read().await;
        if channel != session.channel {
            let _ = confirm.confirm().await;
            return;
        }
        if session.is_expired(now_ms()) {
            // Do NOT confirm: the message may re-arrive on resume, which is
            // fine because the session itself is gone by the time it does.
            let _ = self.client_events.send(ClientEvent::Error(SessionError::SessionExpired));
            drop(session);
            let _ = self.teardown().await;
            return;
        }
        let plaintext = match self.keymanager.decrypt(&data, session.key_pair.private_key()) {
            Ok(p) => p,
            Err(e) => {
                // Do not confirm: allows reprocessing once the underlying
                // cause (e.g. a corrupted peer state) is fixed.
                let _ = self.client_events.send(ClientEvent::Error(e.into()));
                return;
            }
        };
        match ProtocolMessage::from_json(&plaintext) {
            Ok(ProtocolMessage::Message { payload }) => {
                let _ = confirm.confirm().await;
                let _ = self.client_events.send(ClientEvent::Message(payload));
            }
            // A stray/duplicate handshake artifact (e.g. a history-replayed
            // ack) arriving once the session is already live — a no-op.
            Ok(ProtocolMessage::HandshakeAck) | Ok(ProtocolMessage::HandshakeOffer { .. }) => {
                let _ = confirm.confirm().await;
            }
            Err(e) => {
                let _ = self
                    .client_events
                    .send(ClientEvent::Error(SessionError::TransportParseFailed(e.to_string())));
                let _ = confirm.confirm().await;
            }
        }
    }

    pub async fn send_message(&self, payload: serde_json::Value) -> Result<bool, SessionError> {
        let session = self.session.read().await;
        if session.is_expired(now_ms()) {
            return Err(SessionError::SessionExpired);
        }
        let wire = ProtocolMessage::message(payload).to_json();
        let ciphertext = self.keymanager.encrypt(&wire, &session.their_public_key)?;
        let accepted = self.transport.publish(&session.channel, &ciphertext).await?;
        Ok(accepted)
    }

    /// Disconnect path: clear transport for the current channel and
    /// delete the session from the store (never keep an expired/stale entry
    /// around). `transport.disconnect()` (inside `teardown`) emits the
    /// broker-level `Disconnected` event that the pump loop turns into
    /// `ClientEvent::Disconnected` - satisfying the rule that "a session that ends
    /// abnormally always results in a disconnected event" without a second,
    /// redundant emission here.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.teardown().await
    }

    /// Shared by the explicit disconnect path and the `SESSION_EXPIRED`
    /// fast path observed on the session channel — both end the session
    /// the same way, they differ only in which event they emit.
    ///
    /// The private key is `Zeroizing`-backed (see `session_crypto::KeyPair`);
    /// dropping the session guard below is what wipes it from memory.
    async fn teardown(&self) -> Result<(), SessionError> {
        let (session_id, channel) = {
            let session = self.session.read().await;
            (session.id.clone(), session.channel.clone())
        };
        let _ = self.transport.clear(&channel).await;
        self.transport.disconnect().await?;
        self.sessionstore.delete(&session_id).await?;
        Ok(())
    }

    /// Heals a one-sided partition: disconnects and reconnects the
    /// transport's broker, forcing a fresh history-driven recovery on every
    /// channel the transport is subscribed to (the current session channel
    /// included), so any publication missed during the partition is
    /// delivered exactly once.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.transport.reconnect().await?;
        Ok(())
    }

    pub async fn session_id(&self) -> String {
        self.session.read().await.id.clone()
    }

    pub async fn is_expired(&self) -> bool {
        self.session.read().await.is_expired(now_ms())
    }
}
