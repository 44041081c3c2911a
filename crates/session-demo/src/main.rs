//! Drives an `Initiator` and a `Responder` through a full handshake and one
//! application message over the in-memory reference broker/store/keymanager,
//! in trusted or untrusted mode; everything
//! here runs in one process, standing in for the two peers' hosts.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use session_core::{ClientEvent, Initiator, OtpDecision, OtpPrompt, Responder, SessionConfig};
use session_crypto::{KeyManager, Secp256k1KeyManager};
use session_store::{KeyValueStore, MemoryKvStore, SessionStore};
use session_transport::{Broker, InMemoryBroker, InMemoryBrokerHub, TransportConfig};
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "session-demo")]
#[command(about = "Runs an initiator/responder handshake over the in-memory broker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trusted-mode handshake: no OTP, offer acceptance is implicit.
    Trusted,
    /// Untrusted-mode handshake: an OTP is generated by the responder and
    /// relayed back to the initiator, standing in for a human reading it
    /// off the wallet's screen.
    Untrusted,
}

/// An `OtpPrompt` whose answer arrives over a channel instead of a
/// keyboard — this demo relays the responder's generated OTP straight back
/// rather than asking an interactive user to retype it.
struct RelayOtpPrompt {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl RelayOtpPrompt {
    fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx: Mutex::new(rx) }
    }
}

#[async_trait::async_trait]
impl OtpPrompt for RelayOtpPrompt {
    async fn prompt(&self, _deadline_ms: i64) -> OtpDecision {
        match self.rx.lock().await.recv().await {
            Some(otp) => OtpDecision::Submit(otp),
            None => OtpDecision::Cancel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match Cli::parse().command {
        Commands::Trusted => run_trusted().await,
        Commands::Untrusted => run_untrusted().await,
    }
}

async fn run_trusted() -> Result<()> {
    let hub = InMemoryBrokerHub::new();
    let keymanager: Arc<dyn KeyManager> = Arc::new(Secp256k1KeyManager::new());
    let config = SessionConfig::default();

    let (initiator_kv, initiator_store, initiator_broker) = peer_resources(hub.clone()).await?;
    let (responder_kv, responder_store, responder_broker) = peer_resources(hub).await?;

    let (initiator_tx, mut initiator_rx) = mpsc::unbounded_channel();
    let initiator_task = tokio::spawn({
        let keymanager = keymanager.clone();
        async move {
            Initiator::connect_trusted(
                initiator_broker,
                initiator_kv,
                keymanager,
                initiator_store,
                TransportConfig::default(),
                config,
                initiator_tx,
                None,
            )
            .await
        }
    });

    let request = await_session_request(&mut initiator_rx).await?;
    println!("initiator published session_request: {}", request.to_json());

    let (responder_tx, mut responder_rx) = mpsc::unbounded_channel();
    let responder = Responder::connect(
        responder_broker,
        responder_kv,
        keymanager,
        responder_store,
        TransportConfig::default(),
        config,
        responder_tx,
        request,
    )
    .await?;

    let initiator = initiator_task.await??;
    println!("initiator session id: {}", initiator.session_id().await);
    println!("responder session id: {}", responder.session_id().await);

    responder
        .send_message(serde_json::json!({"method": "eth_accounts", "params": []}))
        .await?;
    let payload = await_message(&mut initiator_rx).await?;
    println!("initiator received: {payload}");

    initiator.disconnect().await?;
    responder.disconnect().await?;
    let _ = responder_rx;
    Ok(())
}

async fn run_untrusted() -> Result<()> {
    let hub = InMemoryBrokerHub::new();
    let keymanager: Arc<dyn KeyManager> = Arc::new(Secp256k1KeyManager::new());
    let config = SessionConfig::default();

    let (initiator_kv, initiator_store, initiator_broker) = peer_resources(hub.clone()).await?;
    let (responder_kv, responder_store, responder_broker) = peer_resources(hub).await?;

    let (otp_tx, otp_rx) = mpsc::unbounded_channel();
    let otp_prompt: Arc<dyn OtpPrompt> = Arc::new(RelayOtpPrompt::new(otp_rx));

    let (initiator_tx, mut initiator_rx) = mpsc::unbounded_channel();
    let initiator_task = tokio::spawn({
        let keymanager = keymanager.clone();
        async move {
            Initiator::connect_untrusted(
                initiator_broker,
                initiator_kv,
                keymanager,
                initiator_store,
                TransportConfig::default(),
                config,
                initiator_tx,
                otp_prompt,
                None,
            )
            .await
        }
    });

    let request = await_session_request(&mut initiator_rx).await?;
    println!("initiator published session_request: {}", request.to_json());

    let (responder_tx, mut responder_rx) = mpsc::unbounded_channel();
    let responder_task = tokio::spawn(async move {
        Responder::connect(
            responder_broker,
            responder_kv,
            keymanager,
            responder_store,
            TransportConfig::default(),
            config,
            responder_tx,
            request,
        )
        .await
    });

    loop {
        match responder_rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("responder closed before displaying an otp"))?
        {
            ClientEvent::DisplayOtp { otp, deadline_ms } => {
                println!("responder displays otp {otp} (valid until {deadline_ms})");
                otp_tx.send(otp).map_err(|_| anyhow!("initiator dropped its otp prompt"))?;
                break;
            }
            _ => continue,
        }
    }

    let initiator = initiator_task.await??;
    let responder = responder_task.await??;
    println!("initiator session id: {}", initiator.session_id().await);
    println!("responder session id: {}", responder.session_id().await);

    responder
        .send_message(serde_json::json!({"method": "eth_accounts", "params": []}))
        .await?;
    let payload = await_message(&mut initiator_rx).await?;
    println!("initiator received: {payload}");

    initiator.disconnect().await?;
    responder.disconnect().await?;
    Ok(())
}

/// One peer's resources: its own in-process kv store and session store, and
/// a broker handle over the hub shared with its counterpart (mirroring two
/// real processes talking through one relay).
async fn peer_resources(hub: Arc<InMemoryBrokerHub>) -> Result<(Arc<dyn KeyValueStore>, Arc<SessionStore>, Arc<dyn Broker>)> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let store = Arc::new(SessionStore::create(kv.clone()).await?);
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(hub));
    Ok((kv, store, broker))
}

async fn await_session_request(
    rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> Result<session_proto::SessionRequest> {
    loop {
        match rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("initiator closed before emitting a session_request"))?
        {
            ClientEvent::SessionRequest(r) => return Ok(r),
            _ => continue,
        }
    }
}

async fn await_message(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Result<serde_json::Value> {
    loop {
        match rx.recv().await.ok_or_else(|| anyhow!("event channel closed"))? {
            ClientEvent::Message(payload) => return Ok(payload),
            ClientEvent::Error(e) => return Err(anyhow!("client error: {e}")),
            _ => continue,
        }
    }
}
