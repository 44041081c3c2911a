//! session-crypto — the `KeyManager` contract consumed by the core, plus a
//! secp256k1/ECIES reference implementation.
//!
//! # Modules
//! - `error`     — `CryptoError`, the closed set of failures this crate can produce.
//! - `keypair`   — `KeyPair`, a zeroizing holder of a public/private key pair.
//! - `manager`   — the `KeyManager` trait itself.
//! - `secp256k1` — `Secp256k1KeyManager`, an ECDH + HKDF-SHA256 + XChaCha20-Poly1305 implementation.

pub mod error;
pub mod keypair;
pub mod manager;
pub mod secp256k1;

pub use error::CryptoError;
pub use keypair::KeyPair;
pub use manager::KeyManager;
pub use secp256k1::Secp256k1KeyManager;
