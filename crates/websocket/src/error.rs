//! Error types for the socket layer.

/// Errors produced by the framing codec, handshake and socket registry.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame payload of {0} bytes exceeds the supported maximum")]
    OversizedFrame(u64),

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection is closed")]
    Closed,
}
