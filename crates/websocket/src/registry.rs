//! Registry of live sockets, keyed by agent class and hash.
//!
//! Each server instance owns one registry; nothing here is global.
//! Entries are inserted after the handshake and removed when the pump
//! reports the connection closed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::types::AgentClass;

use crate::socket::SocketConnection;

type Key = (AgentClass, String);

/// Live connections for one node.
#[derive(Default)]
pub struct SocketRegistry {
    sockets: RwLock<HashMap<Key, Arc<SocketConnection>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket and activates it, returning any displaced
    /// connection for the same peer so the caller can close it.
    pub async fn insert(&self, socket: Arc<SocketConnection>) -> Option<Arc<SocketConnection>> {
        let key = (socket.class(), socket.agent().to_string());
        socket.activate();
        let displaced = self.sockets.write().await.insert(key, socket);
        displaced.filter(|previous| previous.is_open())
    }

    pub async fn get(&self, class: AgentClass, agent: &str) -> Option<Arc<SocketConnection>> {
        self.sockets
            .read()
            .await
            .get(&(class, agent.to_string()))
            .cloned()
    }

    /// Returns the socket only when it is still usable.
    pub async fn get_open(&self, class: AgentClass, agent: &str) -> Option<Arc<SocketConnection>> {
        self.get(class, agent).await.filter(|s| s.is_open())
    }

    /// Removes a peer's entry, but only if it still refers to the
    /// given socket. A reconnect may have replaced the entry already.
    pub async fn remove(&self, socket: &Arc<SocketConnection>) -> bool {
        let key = (socket.class(), socket.agent().to_string());
        let mut sockets = self.sockets.write().await;
        match sockets.get(&key) {
            Some(current) if Arc::ptr_eq(current, socket) => {
                sockets.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Hashes of all connected peers of one class.
    pub async fn agents(&self, class: AgentClass) -> Vec<String> {
        self.sockets
            .read()
            .await
            .keys()
            .filter(|(c, _)| *c == class)
            .map(|(_, agent)| agent.clone())
            .collect()
    }

    /// All open sockets of one class.
    pub async fn all(&self, class: AgentClass) -> Vec<Arc<SocketConnection>> {
        self.sockets
            .read()
            .await
            .iter()
            .filter(|((c, _), socket)| *c == class && socket.is_open())
            .map(|(_, socket)| Arc::clone(socket))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sockets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sockets.read().await.is_empty()
    }

    /// Sends an envelope to every open socket of a class. Delivery
    /// failures are noted and skipped; a broadcast never aborts.
    pub async fn broadcast(&self, class: AgentClass, message: &ServiceMessage) {
        for socket in self.all(class).await {
            if let Err(error) = socket.send_message(message).await {
                tracing::debug!(
                    agent = %socket.agent(),
                    %class,
                    "broadcast delivery failed: {error}"
                );
            }
        }
    }

    /// Closes every socket and clears the registry.
    pub async fn close_all(&self) {
        let sockets: Vec<_> = {
            let mut map = self.sockets.write().await;
            map.drain().map(|(_, socket)| socket).collect()
        };
        for socket in sockets {
            socket.close().await;
        }
    }
}
