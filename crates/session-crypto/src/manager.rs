use crate::{CryptoError, KeyPair};

/// The capability a host supplies (or this crate's reference impl provides)
/// for ephemeral keypair generation and public-key encryption.
///
/// `encrypt`/`decrypt` are ECIES-like: the scheme is not specified beyond
/// "public-key encryption with self-contained output" — callers never manage
/// a shared IV or session key themselves.
pub trait KeyManager: Send + Sync {
    fn generate_key_pair(&self) -> KeyPair;

    /// Fails with `CryptoError::InvalidKey` if `bytes` is not a valid
    /// 33-byte compressed secp256k1 public key.
    fn validate_peer_key(&self, bytes: &[u8]) -> Result<(), CryptoError>;

    fn encrypt(&self, plaintext_utf8: &str, their_public_key: &[u8]) -> Result<String, CryptoError>;

    fn decrypt(&self, base64_ciphertext: &str, my_private_key: &[u8]) -> Result<String, CryptoError>;
}
