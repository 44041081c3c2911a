//! The responder (wallet) peer client: consumes an out-of-band
//! `SessionRequest`, runs the matching handshake variant, and hands off to
//! a `BaseClient` once connected.

use std::sync::Arc;

use session_crypto::KeyManager;
use session_proto::{ProtocolMessage, SessionMode, SessionRequest};
use session_store::{KeyValueStore, SessionStore};
use session_transport::{Broker, Transport, TransportConfig};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::base_client::BaseClient;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::ClientEvent;
use crate::handler::{ConnectionHandler, HandlerContext, ResponderTrustedState, ResponderUntrustedState};
use crate::time::now_ms;

pub struct Responder {
    client: Arc<BaseClient>,
}

impl Responder {
    /// Expiry is checked before any broker I/O: an already-expired
    /// request fails fast with `RequestExpired` and never opens a connection.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        kv: Arc<dyn KeyValueStore>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        transport_config: TransportConfig,
        config: SessionConfig,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        request: SessionRequest,
    ) -> Result<Self, SessionError> {
        if request.is_expired(now_ms()) {
            return Err(SessionError::RequestExpired);
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(broker, kv, transport_config, events_tx).await?;
        let key_pair = keymanager.generate_key_pair();
        let channel_id = Uuid::new_v4().to_string();
        let initial_message = request.initial_message.clone();

        let mut ctx = HandlerContext {
            transport: &transport,
            transport_events: &mut events_rx,
            keymanager: &keymanager,
            sessionstore: &sessionstore,
            client_events: &client_events,
            config: &config,
        };
        let session = match request.mode {
            SessionMode::Trusted => {
                ConnectionHandler::ResponderTrusted(ResponderTrustedState {
                    request,
                    key_pair,
                    channel_id,
                })
                .execute(&mut ctx)
                .await?
            }
            SessionMode::Untrusted => {
                ConnectionHandler::ResponderUntrusted(ResponderUntrustedState {
                    request,
                    key_pair,
                    channel_id,
                })
                .execute(&mut ctx)
                .await?
            }
        };

        let client = BaseClient::spawn(transport, events_rx, keymanager, sessionstore, client_events.clone(), session);

        // A session_request carrying `initialMessage` synthesizes it as the
        // first inbound application message, with no extra transport round trip.
        if let Some(ProtocolMessage::Message { payload }) = initial_message {
            let _ = client_events.send(ClientEvent::Message(payload));
        }

        Ok(Self { client })
    }

    /// Reattach to a previously persisted session without repeating the
    /// handshake (resume-after-disconnect).
    pub async fn resume(
        broker: Arc<dyn Broker>,
        kv: Arc<dyn KeyValueStore>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        transport_config: TransportConfig,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        session_id: &str,
    ) -> Result<Self, SessionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(broker, kv, transport_config, events_tx).await?;
        let client = BaseClient::resume(transport, events_rx, keymanager, sessionstore, client_events, session_id).await?;
        Ok(Self { client })
    }

    pub async fn send_message(&self, payload: serde_json::Value) -> Result<bool, SessionError> {
        self.client.send_message(payload).await
    }

    /// The responder's name for `send_message`; wallets send responses.
    pub async fn send_response(&self, payload: serde_json::Value) -> Result<bool, SessionError> {
        self.send_message(payload).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.client.disconnect().await
    }

    /// Heals a one-sided partition (spec.md §8 S7): reconnects the
    /// transport and forces history-driven recovery on the session channel.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.client.reconnect().await
    }

    pub async fn session_id(&self) -> String {
        self.client.session_id().await
    }
}
