//! Reference `KeyManager`: ephemeral-static ECDH on secp256k1, HKDF-SHA256
//! key derivation, XChaCha20-Poly1305 sealing.
//!
//! Wire format of the returned base64 string:
//! `ephemeral_pubkey(33) || nonce(24) || ciphertext_and_tag`.
//! Self-contained per the KeyManager contract: a caller only needs the
//! recipient's static private key to decrypt.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use crate::{CryptoError, KeyManager, KeyPair};

const HKDF_INFO: &[u8] = b"session-proto-ecies-v1";
const EPHEMERAL_PUBKEY_LEN: usize = 33;
const NONCE_LEN: usize = 24;

#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1KeyManager;

impl Secp256k1KeyManager {
    pub fn new() -> Self {
        Self
    }

    fn derive_symmetric_key(shared_secret: &[u8], ephemeral_pub: &[u8]) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = [0u8; 32];
        let mut info = Vec::with_capacity(ephemeral_pub.len() + HKDF_INFO.len());
        info.extend_from_slice(ephemeral_pub);
        info.extend_from_slice(HKDF_INFO);
        hk.expand(&info, &mut okm)
            .expect("32-byte okm is within HKDF-SHA256's output bound");
        okm
    }
}

impl KeyManager for Secp256k1KeyManager {
    fn generate_key_pair(&self) -> KeyPair {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(true);
        KeyPair::new(public.as_bytes().to_vec(), secret.to_bytes().to_vec())
    }

    fn validate_peer_key(&self, bytes: &[u8]) -> Result<(), CryptoError> {
        if bytes.len() != EPHEMERAL_PUBKEY_LEN || !matches!(bytes[0], 0x02 | 0x03) {
            return Err(CryptoError::InvalidKey);
        }
        PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(())
    }

    fn encrypt(&self, plaintext_utf8: &str, their_public_key: &[u8]) -> Result<String, CryptoError> {
        self.validate_peer_key(their_public_key)?;
        let their_pub =
            PublicKey::from_sec1_bytes(their_public_key).map_err(|_| CryptoError::InvalidKey)?;

        let ephemeral = SecretKey::random(&mut OsRng);
        let ephemeral_pub = ephemeral.public_key().to_encoded_point(true);
        let ephemeral_pub_bytes = ephemeral_pub.as_bytes();

        let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), their_pub.as_affine());
        let key = Self::derive_symmetric_key(shared.raw_secret_bytes().as_slice(), ephemeral_pub_bytes);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let cipher = XChaCha20Poly1305::new((&key).into());
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext_utf8.as_bytes())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut wire = Vec::with_capacity(ephemeral_pub_bytes.len() + NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(ephemeral_pub_bytes);
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(wire))
    }

    fn decrypt(&self, base64_ciphertext: &str, my_private_key: &[u8]) -> Result<String, CryptoError> {
        let wire = STANDARD.decode(base64_ciphertext)?;
        if wire.len() < EPHEMERAL_PUBKEY_LEN + NONCE_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let (ephemeral_pub_bytes, rest) = wire.split_at(EPHEMERAL_PUBKEY_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let ephemeral_pub = PublicKey::from_sec1_bytes(ephemeral_pub_bytes)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let my_secret =
            SecretKey::from_slice(my_private_key).map_err(|_| CryptoError::DecryptionFailed)?;

        let shared = diffie_hellman(my_secret.to_nonzero_scalar(), ephemeral_pub.as_affine());
        let key = Self::derive_symmetric_key(shared.raw_secret_bytes().as_slice(), ephemeral_pub_bytes);

        let cipher = XChaCha20Poly1305::new((&key).into());
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let km = Secp256k1KeyManager::new();
        let bob = km.generate_key_pair();
        let ct = km.encrypt("hello wallet", &bob.public_key).expect("encrypt");
        let pt = km.decrypt(&ct, bob.private_key()).expect("decrypt");
        assert_eq!(pt, "hello wallet");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let km = Secp256k1KeyManager::new();
        let bob = km.generate_key_pair();
        let eve = km.generate_key_pair();
        let ct = km.encrypt("secret", &bob.public_key).expect("encrypt");
        assert!(matches!(
            km.decrypt(&ct, eve.private_key()),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let km = Secp256k1KeyManager::new();
        let bob = km.generate_key_pair();
        let ct = km.encrypt("secret", &bob.public_key).expect("encrypt");
        let mut raw = STANDARD.decode(ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = STANDARD.encode(raw);
        assert!(km.decrypt(&tampered, bob.private_key()).is_err());
    }

    #[test]
    fn validate_peer_key_rejects_bad_length() {
        let km = Secp256k1KeyManager::new();
        assert!(matches!(
            km.validate_peer_key(&[0x02; 10]),
            Err(CryptoError::InvalidKey)
        ));
    }

    #[test]
    fn validate_peer_key_rejects_bad_prefix() {
        let km = Secp256k1KeyManager::new();
        let mut bad = [0u8; 33];
        bad[0] = 0x04;
        assert!(matches!(
            km.validate_peer_key(&bad),
            Err(CryptoError::InvalidKey)
        ));
    }

    #[test]
    fn validate_peer_key_accepts_generated_keys() {
        let km = Secp256k1KeyManager::new();
        let kp = km.generate_key_pair();
        assert!(km.validate_peer_key(&kp.public_key).is_ok());
        assert_eq!(kp.public_key.len(), 33);
        assert!(matches!(kp.public_key[0], 0x02 | 0x03));
    }
}
