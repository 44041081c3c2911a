#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("peer public key is not a valid compressed secp256k1 point")]
    InvalidKey,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed base64 payload")]
    Base64Decode(#[from] base64::DecodeError),
}
