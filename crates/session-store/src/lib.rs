//! session-store — the `KeyValueStore` contract, reference adapters over it,
//! and the `SessionStore` persistence layer built on top.
//!
//! # Modules
//! - `error`   — `KvError`/`SessionStoreError`.
//! - `kv`      — the `KeyValueStore` trait itself.
//! - `memory`  — `MemoryKvStore`, an in-process reference implementation.
//! - `file`    — `FileKvStore`, a JSON-file-backed reference implementation.
//! - `session` — the persisted `Session` record and its wire/disk encoding.
//! - `store`   — `SessionStore`: master-list index, TTL enforcement, GC.

pub mod error;
pub mod file;
pub mod kv;
pub mod memory;
pub mod session;
pub mod store;

pub use error::{KvError, SessionStoreError};
pub use file::FileKvStore;
pub use kv::KeyValueStore;
pub use memory::MemoryKvStore;
pub use session::Session;
pub use store::SessionStore;
