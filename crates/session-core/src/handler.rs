//! The handshake state machine. Represented as a tagged-variant enum
//! dispatch rather than a trait object: the four role × trust-mode
//! combinations share almost nothing structurally (different message
//! sequences, different encryption points) but all funnel through the same
//! `execute` entry point and all produce a `Session` or a `SessionError`.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use session_crypto::{KeyManager, KeyPair};
use session_proto::{HandshakeOfferPayload, ProtocolMessage, SessionRequest};
use session_store::{Session, SessionStore};
use session_transport::{Transport, TransportEvent};
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{ClientEvent, OtpDecision, OtpPrompt};
use crate::time::now_ms;

fn session_channel(channel_id: &str) -> String {
    format!("session:{channel_id}")
}

fn generate_otp() -> String {
    use rand::Rng;
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

pub(crate) struct HandlerContext<'a> {
    pub transport: &'a Arc<Transport>,
    pub transport_events: &'a mut mpsc::UnboundedReceiver<TransportEvent>,
    pub keymanager: &'a Arc<dyn KeyManager>,
    pub sessionstore: &'a SessionStore,
    pub client_events: &'a mpsc::UnboundedSender<ClientEvent>,
    pub config: &'a SessionConfig,
}

pub(crate) struct InitiatorTrustedState {
    pub id: String,
    pub handshake_channel: String,
    pub expires_at_ms: i64,
    pub key_pair: KeyPair,
}

pub(crate) struct InitiatorUntrustedState {
    pub id: String,
    pub handshake_channel: String,
    pub expires_at_ms: i64,
    pub key_pair: KeyPair,
    pub otp_prompt: Arc<dyn OtpPrompt>,
}

pub(crate) struct ResponderTrustedState {
    pub request: SessionRequest,
    pub key_pair: KeyPair,
    pub channel_id: String,
}

pub(crate) struct ResponderUntrustedState {
    pub request: SessionRequest,
    pub key_pair: KeyPair,
    pub channel_id: String,
}

/// The four shapes a handshake can take, tagged by role and trust mode.
/// Each variant carries only the state its own procedure needs; `execute`
/// is the single entry point the `Initiator`/`Responder` peer clients use.
pub(crate) enum ConnectionHandler {
    InitiatorTrusted(InitiatorTrustedState),
    InitiatorUntrusted(InitiatorUntrustedState),
    ResponderTrusted(ResponderTrustedState),
    ResponderUntrusted(ResponderUntrustedState),
}

impl ConnectionHandler {
    pub(crate) async fn execute(self, ctx: &mut HandlerContext<'_>) -> Result<Session, SessionError> {
        match self {
            ConnectionHandler::InitiatorTrusted(s) => initiator_trusted(ctx, s).await,
            ConnectionHandler::InitiatorUntrusted(s) => initiator_untrusted(ctx, s).await,
            ConnectionHandler::ResponderTrusted(s) => responder_trusted(ctx, s).await,
            ConnectionHandler::ResponderUntrusted(s) => responder_untrusted(ctx, s).await,
        }
    }
}

/// Waits for the next inbound envelope on `channel` whose decoded
/// `ProtocolMessage` satisfies `matches`, decrypting first if `decrypt_with`
/// is given (the session channel carries ciphertext; the handshake channel
/// doesn't). Anything else observed in the meantime — a message on another
/// channel, a stray protocol variant, a malformed payload — is confirmed
/// (dropped) and the wait continues. Times out at `deadline_ms`.
async fn recv_expected<F>(
    ctx: &mut HandlerContext<'_>,
    channel: &str,
    deadline_ms: i64,
    decrypt_with: Option<&[u8]>,
    matches: F,
) -> Result<ProtocolMessage, SessionError>
where
    F: Fn(&ProtocolMessage) -> bool,
{
    loop {
        let now = now_ms();
        if now >= deadline_ms {
            return Err(SessionError::RequestExpired);
        }
        let remaining = Duration::from_millis((deadline_ms - now) as u64);
        let event = match tokio::time::timeout(remaining, ctx.transport_events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Err(SessionError::TransportDisconnected),
            Err(_) => return Err(SessionError::RequestExpired),
        };
        match event {
            TransportEvent::Message { channel: c, data, confirm } => {
                if c != channel {
                    let _ = confirm.confirm().await;
                    continue;
                }
                let plaintext = match decrypt_with {
                    Some(private_key) => match ctx.keymanager.decrypt(&data, private_key) {
                        Ok(p) => p,
                        Err(e) => {
                            let _ = ctx.client_events.send(ClientEvent::Error(e.into()));
                            let _ = confirm.confirm().await;
                            continue;
                        }
                    },
                    None => data,
                };
                match ProtocolMessage::from_json(&plaintext) {
                    Ok(msg) if matches(&msg) => {
                        let _ = confirm.confirm().await;
                        return Ok(msg);
                    }
                    Ok(_unmatched) => {
                        let _ = confirm.confirm().await;
                        continue;
                    }
                    Err(e) => {
                        let _ = ctx
                            .client_events
                            .send(ClientEvent::Error(SessionError::TransportParseFailed(e.to_string())));
                        let _ = confirm.confirm().await;
                        continue;
                    }
                }
            }
            TransportEvent::Error(e) => {
                let _ = ctx.client_events.send(ClientEvent::Error(e.into()));
            }
            TransportEvent::Connected | TransportEvent::Connecting | TransportEvent::Disconnected => {}
        }
    }
}

fn decode_peer_key(ctx: &HandlerContext<'_>, public_key_b64: &str) -> Result<Vec<u8>, SessionError> {
    let bytes = STANDARD.decode(public_key_b64).map_err(|_| SessionError::InvalidKey)?;
    ctx.keymanager.validate_peer_key(&bytes)?;
    Ok(bytes)
}

fn session_expiry(config: &SessionConfig) -> i64 {
    now_ms() + config.default_session_ttl.as_millis() as i64
}

async fn initiator_trusted(
    ctx: &mut HandlerContext<'_>,
    state: InitiatorTrustedState,
) -> Result<Session, SessionError> {
    ctx.transport.connect().await?;
    ctx.transport.subscribe(&state.handshake_channel).await?;

    let result = initiator_trusted_inner(ctx, &state).await;
    if result.is_err() {
        let _ = ctx.transport.clear(&state.handshake_channel).await;
    }
    result
}

async fn initiator_trusted_inner(
    ctx: &mut HandlerContext<'_>,
    state: &InitiatorTrustedState,
) -> Result<Session, SessionError> {
    let deadline = state.expires_at_ms + ctx.config.handshake_timeout.as_millis() as i64;
    let offer = recv_expected(ctx, &state.handshake_channel, deadline, None, |m| {
        matches!(m, ProtocolMessage::HandshakeOffer { .. })
    })
    .await?;
    let payload = match offer {
        ProtocolMessage::HandshakeOffer { payload } => payload,
        _ => unreachable!("recv_expected only returns messages matching its predicate"),
    };

    let their_public_key = decode_peer_key(ctx, &payload.public_key_b64)?;
    let session = Session {
        id: state.id.clone(),
        channel: session_channel(&payload.channel_id),
        key_pair: state.key_pair.clone(),
        their_public_key,
        expires_at: session_expiry(ctx.config),
    };
    ctx.sessionstore.set(&session).await?;
    ctx.transport.subscribe(&session.channel).await?;
    ctx.transport.clear(&state.handshake_channel).await?;
    Ok(session)
}

async fn initiator_untrusted(
    ctx: &mut HandlerContext<'_>,
    state: InitiatorUntrustedState,
) -> Result<Session, SessionError> {
    ctx.transport.connect().await?;
    ctx.transport.subscribe(&state.handshake_channel).await?;

    let result = initiator_untrusted_inner(ctx, &state).await;
    if result.is_err() {
        let _ = ctx.transport.clear(&state.handshake_channel).await;
    }
    result
}

async fn initiator_untrusted_inner(
    ctx: &mut HandlerContext<'_>,
    state: &InitiatorUntrustedState,
) -> Result<Session, SessionError> {
    let offer = recv_expected(ctx, &state.handshake_channel, state.expires_at_ms, None, |m| {
        matches!(m, ProtocolMessage::HandshakeOffer { .. })
    })
    .await?;
    let payload = match offer {
        ProtocolMessage::HandshakeOffer { payload } => payload,
        _ => unreachable!("recv_expected only returns messages matching its predicate"),
    };

    let (otp, otp_deadline) = match (&payload.otp, payload.deadline) {
        (Some(otp), Some(deadline)) => (otp.clone(), deadline),
        _ => {
            return Err(SessionError::TransportParseFailed(
                "handshake-offer missing otp/deadline for untrusted mode".to_string(),
            ))
        }
    };
    if otp_deadline < now_ms() {
        return Err(SessionError::OtpEntryTimeout);
    }

    let mut accepted = false;
    for _attempt in 1..=ctx.config.otp_max_attempts {
        match state.otp_prompt.prompt(otp_deadline).await {
            OtpDecision::Cancel => return Err(SessionError::RequestExpired),
            OtpDecision::Submit(candidate) => {
                if candidate == otp {
                    accepted = true;
                    break;
                }
                let _ = ctx.client_events.send(ClientEvent::Error(SessionError::OtpIncorrect));
            }
        }
    }
    if !accepted {
        return Err(SessionError::OtpMaxAttemptsReached);
    }

    let their_public_key = decode_peer_key(ctx, &payload.public_key_b64)?;
    let session = Session {
        id: state.id.clone(),
        channel: session_channel(&payload.channel_id),
        key_pair: state.key_pair.clone(),
        their_public_key,
        expires_at: session_expiry(ctx.config),
    };
    ctx.sessionstore.set(&session).await?;
    ctx.transport.subscribe(&session.channel).await?;

    let ack = ctx
        .keymanager
        .encrypt(&ProtocolMessage::HandshakeAck.to_json(), &session.their_public_key)?;
    ctx.transport.publish(&session.channel, &ack).await?;
    ctx.transport.clear(&state.handshake_channel).await?;
    Ok(session)
}

async fn responder_trusted(
    ctx: &mut HandlerContext<'_>,
    state: ResponderTrustedState,
) -> Result<Session, SessionError> {
    ctx.transport.connect().await?;
    ctx.transport.subscribe(&state.request.channel).await?;

    let result = responder_trusted_inner(ctx, &state).await;
    if result.is_err() {
        let _ = ctx.transport.clear(&state.request.channel).await;
    }
    result
}

async fn responder_trusted_inner(
    ctx: &mut HandlerContext<'_>,
    state: &ResponderTrustedState,
) -> Result<Session, SessionError> {
    let their_public_key = decode_peer_key(ctx, &state.request.public_key_b64)?;

    let offer = ProtocolMessage::HandshakeOffer {
        payload: HandshakeOfferPayload {
            channel_id: state.channel_id.clone(),
            public_key_b64: STANDARD.encode(&state.key_pair.public_key),
            otp: None,
            deadline: None,
        },
    };
    ctx.transport.publish(&state.request.channel, &offer.to_json()).await?;

    let channel = session_channel(&state.channel_id);
    ctx.transport.subscribe(&channel).await?;

    // Optimistic finalize: trusted mode has no ack to wait for.
    let session = Session {
        id: state.request.id.clone(),
        channel,
        key_pair: state.key_pair.clone(),
        their_public_key,
        expires_at: session_expiry(ctx.config),
    };
    ctx.sessionstore.set(&session).await?;
    ctx.transport.clear(&state.request.channel).await?;
    Ok(session)
}

async fn responder_untrusted(
    ctx: &mut HandlerContext<'_>,
    state: ResponderUntrustedState,
) -> Result<Session, SessionError> {
    ctx.transport.connect().await?;
    ctx.transport.subscribe(&state.request.channel).await?;

    let result = responder_untrusted_inner(ctx, &state).await;
    if result.is_err() {
        let _ = ctx.transport.clear(&state.request.channel).await;
    }
    result
}

async fn responder_untrusted_inner(
    ctx: &mut HandlerContext<'_>,
    state: &ResponderUntrustedState,
) -> Result<Session, SessionError> {
    let their_public_key = decode_peer_key(ctx, &state.request.public_key_b64)?;

    let otp = generate_otp();
    let otp_deadline = now_ms() + ctx.config.otp_ttl.as_millis() as i64;
    let _ = ctx.client_events.send(ClientEvent::DisplayOtp {
        otp: otp.clone(),
        deadline_ms: otp_deadline,
    });

    let offer = ProtocolMessage::HandshakeOffer {
        payload: HandshakeOfferPayload {
            channel_id: state.channel_id.clone(),
            public_key_b64: STANDARD.encode(&state.key_pair.public_key),
            otp: Some(otp),
            deadline: Some(otp_deadline),
        },
    };
    ctx.transport.publish(&state.request.channel, &offer.to_json()).await?;

    let channel = session_channel(&state.channel_id);
    ctx.transport.subscribe(&channel).await?;

    let ack_deadline = otp_deadline + ctx.config.handshake_timeout.as_millis() as i64;
    recv_expected(ctx, &channel, ack_deadline, Some(state.key_pair.private_key()), |m| {
        matches!(m, ProtocolMessage::HandshakeAck)
    })
    .await?;

    let session = Session {
        id: state.request.id.clone(),
        channel,
        key_pair: state.key_pair.clone(),
        their_public_key,
        expires_at: session_expiry(ctx.config),
    };
    ctx.sessionstore.set(&session).await?;
    ctx.transport.clear(&state.request.channel).await?;
    Ok(session)
}
