use zeroize::Zeroizing;

/// A fresh secp256k1 keypair. The public key is the 33-byte SEC1 compressed
/// encoding; the private key is held zeroizing and is never `Debug`/`Display`
/// printed.
pub struct KeyPair {
    pub public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    pub fn new(public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            public_key,
            private_key: Zeroizing::new(private_key),
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            public_key: self.public_key.clone(),
            private_key: Zeroizing::new(self.private_key.to_vec()),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}
