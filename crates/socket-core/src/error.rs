use thiserror::Error;

/// Errors surfaced by a [`crate::codec::Codec`] implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key length: expected {expected}, got {actual} bytes")]
    InvalidKeyLength {
        expected: &'static str,
        actual: usize,
    },
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cipher padding/block error: {0}")]
    Cipher(String),
    #[error("envelope json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the presence store.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("connection not found")]
    NotFound,
    #[error("remote presence store unreachable: {0}")]
    Backend(String),
    #[error("descriptor json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors a caller can get back from a [`crate::connection::Connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,
    #[error("send queue is full")]
    QueueFull,
    #[error("frame decode failed: {0}")]
    Decode(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
