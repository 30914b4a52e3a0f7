//! Delivery plumbing shared by every service handler.
//!
//! A handler receives a [`Transmit`] and does not care whether the request
//! arrived over a WebSocket or as a plain HTTP POST: `respond` routes the
//! payload back over whichever channel produced it. Outbound traffic to
//! other nodes goes through [`NodeClient`], which stamps the local identity
//! headers on every request.

mod client;
pub mod compress;
mod transmit;

pub use client::{FilePayload, NodeClient, NodeIdentity};
pub use compress::{DEFAULT_LEVEL, compress, decompress};
pub use transmit::{Transmit, json_response};

use sharemesh_websocket::SocketError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("response already sent")]
    ResponseAlreadySent,

    #[error("file responses require an http channel")]
    ChannelMismatch,

    #[error("remote returned status {0}")]
    RemoteStatus(u16),

    #[error("file response missing header {0}")]
    MissingHeader(&'static str),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this failure is routine enough to log at debug level.
    ///
    /// Heartbeat probes hit offline peers constantly; a connect refusal or
    /// a timeout from one of those is expected traffic, not an incident.
    pub fn is_suppressible(&self) -> bool {
        match self {
            TransportError::Http(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }
}
