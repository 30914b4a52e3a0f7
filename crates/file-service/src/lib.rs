//! File operations across the mesh.
//!
//! Requests name an agent; the router decides whether they execute on
//! this device, on whichever device carries the addressed user
//! session, or on a remote peer. Local execution answers with a status
//! payload and repeats it to every interested party; the copy engine
//! adds the manifest/pull protocol on top of the same plumbing.

pub mod copy;
pub mod local;
pub mod route;
pub mod watch;

pub use route::{route_copy, route_file};
pub use watch::WatchRegistry;

use std::sync::Arc;

use sharemesh_agents::{AgentDirectory, LocalIdentity};
use sharemesh_protocol::types::AgentClass;
use sharemesh_transport::{NodeClient, NodeIdentity, TransportError};
use sharemesh_websocket::SocketRegistry;

/// Errors raised while routing or executing file operations.
///
/// Displays double as response bodies: the head of the text decides
/// the HTTP status a caller sees, so the filesystem taxonomy
/// ("not found:", "forbidden:") is preserved verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    FileOps(#[from] sharemesh_file_ops::FileOpsError),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("response build failed: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("not found: {class} agent {agent} has no reachable address")]
    Unreachable { class: AgentClass, agent: String },

    #[error("hashes do not match for file {file}")]
    Integrity { file: String },

    #[error("Unexpected user.")]
    UnexpectedUser,
}

/// Shared state every file-service handler operates on.
pub struct ServiceContext {
    pub client: NodeClient,
    /// zstd level asked of copy sources; 0 pulls bytes raw.
    pub compression: i32,
    pub directory: Arc<AgentDirectory>,
    pub identity: LocalIdentity,
    pub registry: Arc<SocketRegistry>,
    /// Collapses every agent onto this node, for the service harness.
    pub service_test: bool,
    pub watches: WatchRegistry,
}

impl ServiceContext {
    /// Builds the context and spawns the watch refresh task, so this
    /// must run inside a runtime.
    pub fn new(
        identity: LocalIdentity,
        directory: Arc<AgentDirectory>,
        registry: Arc<SocketRegistry>,
        compression: i32,
        service_test: bool,
    ) -> Result<Self, ServiceError> {
        let client = NodeClient::new(NodeIdentity {
            hash_device: identity.hash_device.clone(),
            hash_user: identity.hash_user.clone(),
            name_device: identity.name_device.clone(),
            name_user: identity.name_user.clone(),
        })?;
        let watches = WatchRegistry::new(&identity.hash_device, Arc::clone(&registry));
        Ok(Self {
            client,
            compression,
            directory,
            identity,
            registry,
            service_test,
            watches,
        })
    }

    /// `host:port` for an agent's HTTP listener.
    pub fn http_address(&self, class: AgentClass, agent: &str) -> Result<String, ServiceError> {
        if let Some(record) = self.directory.get(class, agent)
            && let Some(ip) = record.address()
        {
            return Ok(format!("{ip}:{}", record.ports.http));
        }
        Err(ServiceError::Unreachable {
            class,
            agent: agent.to_string(),
        })
    }
}
