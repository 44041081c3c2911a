//! The initiator (dApp) peer client: generates the out-of-band
//! `SessionRequest`, runs the matching handshake variant, and hands off to
//! a `BaseClient` once connected.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use session_crypto::KeyManager;
use session_store::{KeyValueStore, SessionStore};
use session_proto::{ProtocolMessage, SessionMode, SessionRequest};
use session_transport::{Broker, Transport, TransportConfig};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::base_client::BaseClient;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{ClientEvent, OtpPrompt};
use crate::handler::{ConnectionHandler, HandlerContext, InitiatorTrustedState, InitiatorUntrustedState};
use crate::time::now_ms;

pub struct Initiator {
    client: Arc<BaseClient>,
}

struct PreHandshake {
    id: String,
    handshake_channel: String,
    key_pair: session_crypto::KeyPair,
    expires_at_ms: i64,
}

fn begin(keymanager: &Arc<dyn KeyManager>, config: &SessionConfig) -> PreHandshake {
    let id = Uuid::new_v4().to_string();
    PreHandshake {
        handshake_channel: format!("handshake:{id}"),
        key_pair: keymanager.generate_key_pair(),
        expires_at_ms: now_ms() + config.session_request_ttl.as_millis() as i64,
        id,
    }
}

impl Initiator {
    /// Starts a trusted-mode handshake. Emits `ClientEvent::SessionRequest`
    /// immediately, before the handshake completes, so the host can render
    /// it (QR code, deep link) while `connect_trusted` keeps running.
    ///
    /// `initial_payload`, if given, is wrapped as `{type:"message", payload}`
    /// and embedded into the emitted `SessionRequest.initialMessage` — the
    /// responder synthesizes it as the first inbound application message
    /// once the handshake completes, solving the "dApp suspended on mobile
    /// redirect" problem.
    pub async fn connect_trusted(
        broker: Arc<dyn Broker>,
        kv: Arc<dyn KeyValueStore>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        transport_config: TransportConfig,
        config: SessionConfig,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        initial_payload: Option<serde_json::Value>,
    ) -> Result<Self, SessionError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(broker, kv, transport_config, events_tx).await?;

        let pre = begin(&keymanager, &config);
        let request = SessionRequest {
            id: pre.id.clone(),
            mode: SessionMode::Trusted,
            channel: pre.handshake_channel.clone(),
            public_key_b64: STANDARD.encode(&pre.key_pair.public_key),
            expires_at: pre.expires_at_ms,
            initial_message: initial_payload.map(ProtocolMessage::message),
        };
        let _ = client_events.send(ClientEvent::SessionRequest(request));

        let mut ctx = HandlerContext {
            transport: &transport,
            transport_events: &mut events_rx,
            keymanager: &keymanager,
            sessionstore: &sessionstore,
            client_events: &client_events,
            config: &config,
        };
        let session = ConnectionHandler::InitiatorTrusted(InitiatorTrustedState {
            id: pre.id,
            handshake_channel: pre.handshake_channel,
            expires_at_ms: pre.expires_at_ms,
            key_pair: pre.key_pair,
        })
        .execute(&mut ctx)
        .await?;

        let client = BaseClient::spawn(transport, events_rx, keymanager, sessionstore, client_events, session);
        Ok(Self { client })
    }

    /// Starts an untrusted-mode handshake. `otp_prompt` is consulted (up to
    /// `config.otp_max_attempts` times) once the responder's OTP-bearing
    /// offer arrives. `initial_payload` behaves as in [`Self::connect_trusted`].
    pub async fn connect_untrusted(
        broker: Arc<dyn Broker>,
        kv: Arc<dyn KeyValueStore>,
        keymanager: Arc<dyn KeyManager>,
        sessionstore: Arc<SessionStore>,
        transport_config: TransportConfig,
        config: SessionConfig,
        client_events: mpsc::UnboundedSender<ClientEvent>,
        otp_prompt: Arc<dyn OtpPrompt>,
        initial_payload: Option<serde_json::Value>,
    ) -> Result<Self, SessionError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = Transport::new(broker, kv, transport_config, events_tx).await?;

        let pre = begin(&keymanager, &config);
        let request = SessionRequest {
            id: pre.id.clone(),
            mode: SessionMode::Untrusted,
            channel: pre.handshake_channel.clone(),
            public_key_b64: STANDARD.encode(&pre.key_pair.public_key),
            expires_at: pre.expires_at_ms,
            initial_message: initial_payload.map(ProtocolMessage::message),
        };
        let _ = client_events.send(ClientEvent::SessionRequest(request));

        let mut ctx = HandlerContext {
            transport: &transport,
            transport_events: &mut events_rx,
            keymanager: &keymanager,
            sessionstore: &sessionstore,
            client_events: &client_events,
            config: &config,
        };
        let session = ConnectionHandler::InitiatorUntrusted(InitiatorUntrustedState {
            id: pre.id,
            handshake_channel: pre.handshake_channel,
            expires_at_ms: pre.expires_at_ms,
            key_pair: pre.key_pair,
            otp_prompt,
        })
        .execute(&mut ctx)
        .await?;

        let client = BaseClient::spawn(transport, events_rx, keymanager, sessionstore, client_events, session);
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

    /// The initiator's name for `send_message`; dApps send requests.
    pub async fn send_request(&self, payload: serde_json::Value) -> Result<bool, SessionError> {
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
