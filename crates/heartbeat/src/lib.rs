//! Agent presence.
//!
//! Local interaction drives an active/idle state machine whose
//! transitions are announced once, to browser sockets and to every
//! known remote agent. Inbound statuses update the directory's view of
//! each peer. A fanned-out status expects each receiver to echo one
//! back; a peer that stays silent long enough is written off as
//! offline.

pub mod fanout;
pub mod monitor;

pub use fanout::{apply_status, mark_offline};
pub use monitor::ActivityMonitor;

use std::sync::Arc;

use sharemesh_agents::{AgentDirectory, DirectoryError, LocalIdentity};
use sharemesh_transport::{NodeClient, NodeIdentity, TransportError};
use sharemesh_websocket::SocketRegistry;

/// Errors raised while spreading presence.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Shared state for the presence loops, cloned into spawned beat
/// tasks.
#[derive(Clone)]
pub struct StatusContext {
    pub client: Arc<NodeClient>,
    pub directory: Arc<AgentDirectory>,
    pub identity: LocalIdentity,
    pub registry: Arc<SocketRegistry>,
}

impl StatusContext {
    pub fn new(
        identity: LocalIdentity,
        directory: Arc<AgentDirectory>,
        registry: Arc<SocketRegistry>,
    ) -> Result<Self, HeartbeatError> {
        let client = NodeClient::new(NodeIdentity {
            hash_device: identity.hash_device.clone(),
            hash_user: identity.hash_user.clone(),
            name_device: identity.name_device.clone(),
            name_user: identity.name_user.clone(),
        })?;
        Ok(Self {
            client: Arc::new(client),
            directory,
            identity,
            registry,
        })
    }
}
