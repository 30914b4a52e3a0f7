//! One running mesh node: both listeners, the socket registry, the
//! peer directory and the service contexts, assembled from a
//! [`NodeConfig`] and torn down together.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sharemesh_agents::{AgentDirectory, LocalIdentity, local_addresses};
use sharemesh_file_service::ServiceContext;
use sharemesh_heartbeat::{ActivityMonitor, StatusContext};
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::messages::InviteIdentity;
use sharemesh_protocol::types::{ActivityStatus, Agent, AgentClass, Ports};
use sharemesh_transport::Transmit;
use sharemesh_websocket::socket::spawn_read_pump;
use sharemesh_websocket::{MessageSink, Offer, SinkFuture, SocketConnection, SocketRegistry, handshake};

use crate::{NodeConfig, NodeError, dispatch, http};

/// Addresses of the physical link a message arrived over.
///
/// `agent-online` folds these into its answer: the remote side is the
/// address the caller is actually reachable on, the local side is the
/// address the caller reached us on.
#[derive(Clone, Copy, Debug)]
pub struct LinkAddresses {
    pub local: IpAddr,
    pub remote: IpAddr,
}

/// A running node.
pub struct Node {
    cancel: CancellationToken,
    pub config: NodeConfig,
    pub directory: Arc<AgentDirectory>,
    pub identity: LocalIdentity,
    pub monitor: ActivityMonitor,
    pub registry: Arc<SocketRegistry>,
    pub services: Arc<ServiceContext>,
    pub status: StatusContext,
    ports: Ports,
}

impl Node {
    /// Boots a node: storage, identity, both listeners, contexts, and
    /// the accept loops.
    ///
    /// Configured port zero binds an ephemeral port; the directory's
    /// own device record is refreshed with whatever was really bound.
    pub async fn start(config: NodeConfig, service_test: bool) -> Result<Arc<Self>, NodeError> {
        std::fs::create_dir_all(&config.storage)?;
        let directory = Arc::new(AgentDirectory::open(&config.storage)?);
        let identity =
            LocalIdentity::load_or_mint(&config.storage, &config.user_name, &config.device_name)?;

        let ws_listener = bind(&config.listen, config.ports.ws).await?;
        let http_listener = bind(&config.listen, config.ports.http).await?;
        let ports = Ports {
            http: http_listener.local_addr()?.port(),
            ws: ws_listener.local_addr()?.port(),
        };

        refresh_own_record(&directory, &identity, ports)?;

        let registry = Arc::new(SocketRegistry::new());
        let services = Arc::new(ServiceContext::new(
            identity.clone(),
            Arc::clone(&directory),
            Arc::clone(&registry),
            config.compression,
            service_test,
        )?);
        let status = StatusContext::new(
            identity.clone(),
            Arc::clone(&directory),
            Arc::clone(&registry),
        )?;
        let monitor = ActivityMonitor::new(
            status.clone(),
            Duration::from_secs(config.idle_threshold_secs),
        );

        let node = Arc::new(Self {
            cancel: CancellationToken::new(),
            config,
            directory,
            identity,
            monitor,
            registry,
            services,
            status,
            ports,
        });
        info!(
            device = %node.identity.name_device,
            http = ports.http,
            ws = ports.ws,
            "node started"
        );
        tokio::spawn(run_sockets(Arc::clone(&node), ws_listener));
        tokio::spawn(http::run(Arc::clone(&node), http_listener));
        Ok(node)
    }

    /// Ports the node really bound, after any ephemeral assignment.
    pub fn ports(&self) -> Ports {
        self.ports
    }

    /// Token the listeners and read pumps watch.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stops the listeners, the activity monitor and every socket.
    pub async fn shutdown(&self) {
        info!("node stopping");
        self.cancel.cancel();
        self.monitor.shutdown();
        self.registry.close_all().await;
    }

    /// This node's identity as invitation steps carry it.
    pub fn identity_block(&self) -> InviteIdentity {
        InviteIdentity {
            hash_device: self.identity.hash_device.clone(),
            hash_user: self.identity.hash_user.clone(),
            ip_all: local_addresses(),
            ip_selected: String::new(),
            name_device: self.identity.name_device.clone(),
            name_user: self.identity.name_user.clone(),
            ports: self.ports,
            shares: self
                .directory
                .get(AgentClass::Device, &self.identity.hash_device)
                .map(|record| record.shares)
                .unwrap_or_default(),
        }
    }

    /// Whether an offered identity may hold a socket on this node.
    ///
    /// Browsers must present this node's own identity, peers must
    /// already be in the directory, and the harness subprotocol is
    /// waved through.
    fn admits(&self, offer: &Offer) -> bool {
        if offer.test {
            return true;
        }
        match offer.class {
            AgentClass::Browser => self.identity.matches(&offer.agent),
            class => self.directory.contains(class, &offer.agent),
        }
    }

    /// Cleanup shared by every way a socket can end: pump exhaustion,
    /// close frames, and destruction over protocol violations.
    async fn socket_closed(&self, socket: Arc<SocketConnection>) {
        if !self.registry.remove(&socket).await {
            return;
        }
        debug!(agent = %socket.agent(), class = %socket.class(), "socket gone");
        match socket.class() {
            AgentClass::Browser => {}
            class => {
                sharemesh_heartbeat::mark_offline(&self.status, class, socket.agent()).await;
            }
        }
    }
}

async fn bind(listen: &str, port: u16) -> Result<TcpListener, NodeError> {
    let address = format!("{listen}:{port}");
    TcpListener::bind(&address)
        .await
        .map_err(|source| NodeError::Bind { address, source })
}

/// The directory's record of this very node. Ports can change between
/// launches when ephemeral, so the endpoint is rewritten every boot.
fn refresh_own_record(
    directory: &AgentDirectory,
    identity: &LocalIdentity,
    ports: Ports,
) -> Result<(), NodeError> {
    let own = Agent {
        ip_all: local_addresses(),
        ip_selected: String::new(),
        name: identity.name_device.clone(),
        ports,
        shares: HashMap::new(),
        status: ActivityStatus::Active,
    };
    if directory.get(AgentClass::Device, &identity.hash_device).is_some() {
        directory.set_endpoint(AgentClass::Device, &identity.hash_device, &own)?;
    } else {
        directory.insert(AgentClass::Device, &identity.hash_device, own)?;
    }
    Ok(())
}

async fn run_sockets(node: Arc<Node>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = node.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move {
                        accept_socket(node, stream, peer.ip()).await;
                    });
                }
                Err(error) => warn!("socket accept failed: {error}"),
            },
        }
    }
}

/// Runs one socket from TCP accept to read pump.
async fn accept_socket(node: Arc<Node>, stream: TcpStream, remote: IpAddr) {
    let local = match stream.local_addr() {
        Ok(address) => address.ip(),
        Err(error) => {
            debug!(%remote, "local address unavailable: {error}");
            return;
        }
    };
    let link = LinkAddresses { local, remote };

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let offer = match handshake::read_offer(&mut reader).await {
        Ok(offer) => offer,
        Err(error) => {
            debug!(%remote, "handshake rejected: {error}");
            return;
        }
    };
    if !node.admits(&offer) {
        info!(%remote, agent = %offer.agent, class = %offer.class, "socket refused");
        if let Err(error) = handshake::write_refusal(&mut write_half, "Unknown agent.").await {
            debug!("refusal not delivered: {error}");
        }
        return;
    }
    if let Err(error) = handshake::write_accept(&mut write_half, &offer).await {
        debug!(%remote, "accept not delivered: {error}");
        return;
    }

    let socket = SocketConnection::with_threshold(
        &offer.agent,
        offer.class,
        write_half,
        false,
        node.config.fragmentation,
    );
    socket.activate();
    if let Some(displaced) = node.registry.insert(Arc::clone(&socket)).await {
        debug!(agent = %displaced.agent(), "socket displaced by a fresh connection");
        displaced.close().await;
    }
    info!(%remote, agent = %offer.agent, class = %offer.class, "socket open");

    let sink: Arc<dyn MessageSink> = Arc::new(DispatchSink { link, node: Arc::clone(&node) });
    spawn_read_pump(socket, reader, sink, node.cancel.child_token());
}

/// Feeds inbound socket messages into the service dispatcher.
struct DispatchSink {
    link: LinkAddresses,
    node: Arc<Node>,
}

impl MessageSink for DispatchSink {
    fn deliver(&self, socket: Arc<SocketConnection>, payload: String) -> SinkFuture<'_> {
        Box::pin(async move {
            match serde_json::from_str::<ServiceMessage>(&payload) {
                Ok(envelope) => {
                    if socket.class() == AgentClass::Browser {
                        // Browser traffic is someone at the keyboard.
                        self.node.monitor.touch();
                    }
                    let transmit = Transmit::socket(Arc::clone(&socket));
                    dispatch::apply(&self.node, envelope, &transmit, self.link).await;
                }
                Err(error) => {
                    warn!(agent = %socket.agent(), "destroying socket over an undecodable envelope: {error}");
                    socket.destroy().await;
                }
            }
        })
    }

    fn closed(&self, socket: Arc<SocketConnection>) -> SinkFuture<'_> {
        Box::pin(async move {
            self.node.socket_closed(socket).await;
        })
    }
}
