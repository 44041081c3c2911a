//! session-core — the closed error taxonomy, layered configuration, the
//! handshake state machine, `BaseClient`, and the `Initiator`/`Responder`
//! peer clients built on top of `session-proto`/`session-crypto`/
//! `session-store`/`session-transport`.
//!
//! # Modules
//! - `error`       — `SessionError`, the taxonomy every public method here surfaces through.
//! - `config`      — `SessionConfig`, layered tunables with `Default`/`from_env`.
//! - `event`       — `ClientEvent`, `OtpPrompt`/`OtpDecision` (the host boundary).
//! - `handler`      — the `ConnectionHandler` state machine.
//! - `base_client` — `BaseClient`.
//! - `initiator`   — `Initiator` (dApp role).
//! - `responder`   — `Responder` (wallet role).

mod base_client;
pub mod config;
pub mod error;
pub mod event;
mod handler;
mod initiator;
mod responder;
mod time;

pub use config::SessionConfig;
pub use error::{ErrorKind, SessionError};
pub use event::{ClientEvent, OtpDecision, OtpPrompt};
pub use initiator::Initiator;
pub use responder::Responder;

pub use base_client::BaseClient;
