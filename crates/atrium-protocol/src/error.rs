//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding signaling frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed, truncated, or wrong shape.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame parsed but violates protocol rules (e.g. a request sent
    /// before Join that requires room membership).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
