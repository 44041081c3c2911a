#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("key-value store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("key-value store serialisation failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("session has no expiry or is already expired")]
    SaveFailed,
}
