//! The server instance of a mesh node.
//!
//! A [`Node`] owns every registry, runs the WebSocket and HTTP
//! listeners, and dispatches inbound envelopes to their services. The
//! file services live in their own crate; this one adds the mesh
//! services (identity minting, presence, invitations, messaging,
//! settings) and the wiring between them.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod node;
pub mod services;

pub use config::NodeConfig;
pub use node::Node;

use std::path::PathBuf;

use sharemesh_agents::DirectoryError;
use sharemesh_file_service::ServiceError;
use sharemesh_heartbeat::HeartbeatError;
use sharemesh_transport::TransportError;
use sharemesh_websocket::SocketError;

/// Errors raised while starting or running a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("config parse failed: {0}")]
    Config(#[from] toml::de::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("listener bind failed on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("settings write failed at {path}: {source}")]
    Settings {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invite target has no reachable address")]
    InviteUnreachable,

    #[error("request body rejected: {0}")]
    Body(String),

    #[error("request completed without a response")]
    NoResponse,
}
