//! Status spread and missed-beat accounting.
//!
//! One inbound status updates the directory and is repeated to browser
//! sockets; when flagged for broadcast it also fans to every known
//! remote agent. Each fan-out leg expects the peer to echo a status of
//! its own back in the reply; a peer that misses enough echoes in a
//! row is written off as offline.

use std::time::Duration;

use tracing::{debug, warn};

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::StatusMessage;
use sharemesh_protocol::types::{ActivityStatus, AgentClass};

use crate::{HeartbeatError, StatusContext};

/// One echo window: how long a beat may go unanswered before it counts
/// as missed.
const ECHO_WAIT: Duration = Duration::from_secs(5);

/// Missed echoes in a row before a peer is written off.
const MISSED_LIMIT: u32 = 3;

/// Applies one status message: directory flag, share reconciliation,
/// browser echo and, when the sender flagged it, a fan-out to every
/// known remote agent.
pub async fn apply_status(
    ctx: &StatusContext,
    status: StatusMessage,
) -> Result<(), HeartbeatError> {
    absorb(ctx, &status).await?;
    if status.broadcast {
        fan_out(ctx, status).await?;
    }
    Ok(())
}

/// Records what one message says about its sender and repeats it to
/// the local browser sockets. Share lists are only written through
/// when they differ from the cached copy.
async fn absorb(ctx: &StatusContext, status: &StatusMessage) -> Result<(), HeartbeatError> {
    if status.agent_type != AgentClass::Browser {
        ctx.directory
            .set_status(status.agent_type, &status.agent, status.status);
        if let Some(shares) = &status.shares {
            let cached = ctx
                .directory
                .get(status.agent_type, &status.agent)
                .map(|agent| agent.shares);
            if cached.as_ref() != Some(shares) {
                ctx.directory
                    .set_shares(status.agent_type, &status.agent, shares.clone())?;
            }
        }
    }
    let message = ServiceMessage::new(Service::AgentStatus, status)?;
    ctx.registry.broadcast(AgentClass::Browser, &message).await;
    Ok(())
}

/// Fans one status to every known remote agent, one spawned beat per
/// peer so a dead agent cannot stall the rest of the pass.
async fn fan_out(ctx: &StatusContext, status: StatusMessage) -> Result<(), HeartbeatError> {
    // Receivers apply and echo; the cleared flag keeps a status from
    // ricocheting between nodes.
    let mut outbound = status;
    outbound.broadcast = false;
    let message = ServiceMessage::new(Service::AgentStatus, &outbound)?;
    for class in [AgentClass::Device, AgentClass::User] {
        let local = match class {
            AgentClass::User => &ctx.identity.hash_user,
            _ => &ctx.identity.hash_device,
        };
        for (hash, agent) in ctx.directory.all(class) {
            if hash == *local {
                continue;
            }
            let Some(ip) = agent.address() else {
                debug!(%class, agent = %hash, "no address for status fan-out");
                continue;
            };
            let address = format!("{ip}:{}", agent.ports.http);
            tokio::spawn(beat(ctx.clone(), class, hash, address, message.clone()));
        }
    }
    Ok(())
}

/// One leg of a fan-out. The peer answers the POST with a status of
/// its own; each unanswered attempt spends a full echo window, a
/// refused connection included, and [`MISSED_LIMIT`] misses in a row
/// retire the peer.
async fn beat(
    ctx: StatusContext,
    class: AgentClass,
    agent: String,
    address: String,
    message: ServiceMessage,
) {
    let mut missed = 0;
    while missed < MISSED_LIMIT {
        let window = tokio::time::Instant::now();
        match tokio::time::timeout(ECHO_WAIT, ctx.client.send(&address, class, &message)).await {
            Ok(Ok(reply)) => {
                receive_echo(&ctx, &reply).await;
                return;
            }
            Ok(Err(error)) => {
                missed += 1;
                if error.is_suppressible() {
                    debug!(%class, agent, missed, "beat failed: {error}");
                } else {
                    warn!(%class, agent, missed, "beat failed: {error}");
                }
            }
            Err(_) => {
                missed += 1;
                debug!(%class, agent, missed, "beat unanswered");
            }
        }
        if missed < MISSED_LIMIT {
            tokio::time::sleep_until(window + ECHO_WAIT).await;
        }
    }
    mark_offline(&ctx, class, &agent).await;
}

/// Absorbs the status a peer echoed back from a beat. A reply that is
/// not a status message still proves the peer alive.
async fn receive_echo(ctx: &StatusContext, reply: &str) {
    if let Ok(envelope) = serde_json::from_str::<ServiceMessage>(reply)
        && envelope.service == Service::AgentStatus
        && let Ok(mut echo) = envelope.parse::<StatusMessage>()
    {
        // An echo is terminal; it never re-fans.
        echo.broadcast = false;
        if let Err(error) = absorb(ctx, &echo).await {
            debug!("echo absorb failed: {error}");
        }
    }
}

/// Writes a peer off as offline and tells the browsers. Used for
/// silent beats and for sockets that drop without a close handshake.
pub async fn mark_offline(ctx: &StatusContext, class: AgentClass, agent: &str) {
    if !ctx
        .directory
        .set_status(class, agent, ActivityStatus::Offline)
    {
        return;
    }
    debug!(%class, agent, "marked offline");
    let status = StatusMessage {
        agent: agent.to_string(),
        agent_type: class,
        broadcast: false,
        shares: None,
        status: ActivityStatus::Offline,
    };
    match ServiceMessage::new(Service::AgentStatus, &status) {
        Ok(message) => ctx.registry.broadcast(AgentClass::Browser, &message).await,
        Err(error) => debug!("offline encode failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use sharemesh_agents::{AgentDirectory, LocalIdentity};
    use sharemesh_protocol::types::{AddressList, Agent, PathKind, Ports, Share};
    use sharemesh_websocket::{SocketConnection, SocketRegistry, frame};

    fn context(state: &std::path::Path) -> StatusContext {
        let identity = LocalIdentity::load_or_mint(state, "alice", "laptop").unwrap();
        let directory = Arc::new(AgentDirectory::open(state).unwrap());
        StatusContext::new(identity, directory, Arc::new(SocketRegistry::new())).unwrap()
    }

    fn remote(ip: &str, http: u16, status: ActivityStatus) -> Agent {
        Agent {
            ip_all: AddressList {
                ipv4: vec![ip.to_string()],
                ipv6: vec![],
            },
            ip_selected: String::new(),
            name: "peer".into(),
            ports: Ports { http, ws: 0 },
            shares: HashMap::new(),
            status,
        }
    }

    fn status_for(agent: &str, status: ActivityStatus, broadcast: bool) -> StatusMessage {
        StatusMessage {
            agent: agent.to_string(),
            agent_type: AgentClass::Device,
            broadcast,
            shares: None,
            status,
        }
    }

    /// Accepts one connection, captures the request text and answers
    /// with the canned envelope as the echo.
    async fn echo_server(echo: String) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let read = stream.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&request);
                if let Some(split) = text.find("\r\n\r\n") {
                    let body_received = request.len() - split - 4;
                    let expected = text
                        .lines()
                        .find_map(|line| {
                            line.to_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if body_received >= expected {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                echo.len(),
                echo
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (port, handle)
    }

    #[tokio::test]
    async fn statuses_update_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("", 0, ActivityStatus::Offline),
            )
            .unwrap();

        apply_status(&ctx, status_for(&peer, ActivityStatus::Active, false))
            .await
            .unwrap();

        let agent = ctx.directory.get(AgentClass::Device, &peer).unwrap();
        assert_eq!(agent.status, ActivityStatus::Active);
    }

    #[tokio::test]
    async fn embedded_shares_reconcile_and_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("", 0, ActivityStatus::Idle),
            )
            .unwrap();

        let mut shares = HashMap::new();
        shares.insert(
            "s".repeat(128),
            Share {
                execute: false,
                name: "/srv/music".into(),
                read_only: true,
                kind: PathKind::Directory,
            },
        );
        let mut status = status_for(&peer, ActivityStatus::Idle, false);
        status.shares = Some(shares.clone());
        apply_status(&ctx, status).await.unwrap();

        assert_eq!(
            ctx.directory.get(AgentClass::Device, &peer).unwrap().shares,
            shares
        );

        // The reconciled list survives a restart.
        let reopened = AgentDirectory::open(tmp.path()).unwrap();
        assert_eq!(
            reopened.get(AgentClass::Device, &peer).unwrap().shares,
            shares
        );
    }

    #[tokio::test]
    async fn browser_sockets_hear_inbound_statuses() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (_our_read, our_write) = tokio::io::split(ours);
        let (mut peer_read, _peer_write) = tokio::io::split(theirs);
        let browser = SocketConnection::new("browser-1", AgentClass::Browser, our_write, false);
        ctx.registry.insert(browser).await;

        let peer = "b".repeat(128);
        apply_status(&ctx, status_for(&peer, ActivityStatus::Idle, false))
            .await
            .unwrap();

        let frame = frame::read_frame(&mut peer_read).await.unwrap();
        let envelope: ServiceMessage = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(envelope.service, Service::AgentStatus);
        let heard: StatusMessage = envelope.parse().unwrap();
        assert_eq!(heard.agent, peer);
        assert_eq!(heard.status, ActivityStatus::Idle);
    }

    #[tokio::test]
    async fn flagged_status_fans_out_and_absorbs_the_echo() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);

        let echo = ServiceMessage::new(
            Service::AgentStatus,
            &status_for(&peer, ActivityStatus::Active, false),
        )
        .unwrap();
        let (port, server) = echo_server(serde_json::to_string(&echo).unwrap()).await;
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("127.0.0.1", port, ActivityStatus::Offline),
            )
            .unwrap();

        let own = ctx.identity.hash_device.clone();
        apply_status(&ctx, status_for(&own, ActivityStatus::Active, true))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.to_lowercase().contains("request-type: agent-status"));
        // The wire copy never carries the broadcast flag onward.
        assert!(request.contains("\"broadcast\":false"));

        // The echo flips the peer from offline to what it reported.
        let mut last = ActivityStatus::Offline;
        for _ in 0..50 {
            last = ctx.directory.get(AgentClass::Device, &peer).unwrap().status;
            if last == ActivityStatus::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(last, ActivityStatus::Active);
    }

    #[tokio::test]
    async fn silence_writes_a_peer_off() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);
        // Port 1 answers nothing; every beat misses.
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("127.0.0.1", 1, ActivityStatus::Active),
            )
            .unwrap();

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (_our_read, our_write) = tokio::io::split(ours);
        let (mut peer_read, _peer_write) = tokio::io::split(theirs);
        let browser = SocketConnection::new("browser-1", AgentClass::Browser, our_write, false);
        ctx.registry.insert(browser).await;

        let own = ctx.identity.hash_device.clone();
        apply_status(&ctx, status_for(&own, ActivityStatus::Active, true))
            .await
            .unwrap();

        let mut last = ActivityStatus::Active;
        for _ in 0..100 {
            last = ctx.directory.get(AgentClass::Device, &peer).unwrap().status;
            if last == ActivityStatus::Offline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(last, ActivityStatus::Offline);

        // First frame repeats the applied status, second reports the
        // write-off.
        let first = frame::read_frame(&mut peer_read).await.unwrap();
        let envelope: ServiceMessage = serde_json::from_slice(&first.payload).unwrap();
        let heard: StatusMessage = envelope.parse().unwrap();
        assert_eq!(heard.agent, own);

        let second = frame::read_frame(&mut peer_read).await.unwrap();
        let envelope: ServiceMessage = serde_json::from_slice(&second.payload).unwrap();
        let heard: StatusMessage = envelope.parse().unwrap();
        assert_eq!(heard.agent, peer);
        assert_eq!(heard.status, ActivityStatus::Offline);
    }

    #[tokio::test]
    async fn garbled_echoes_change_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("", 0, ActivityStatus::Idle),
            )
            .unwrap();

        receive_echo(&ctx, "ok").await;
        receive_echo(&ctx, "{\"service\":\"log\",\"data\":[]}").await;

        let agent = ctx.directory.get(AgentClass::Device, &peer).unwrap();
        assert_eq!(agent.status, ActivityStatus::Idle);
    }

    #[tokio::test]
    async fn echoes_absorb_without_refanning() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let peer = "b".repeat(128);
        ctx.directory
            .insert(
                AgentClass::Device,
                &peer,
                remote("", 0, ActivityStatus::Offline),
            )
            .unwrap();

        let envelope = ServiceMessage::new(
            Service::AgentStatus,
            &status_for(&peer, ActivityStatus::Active, true),
        )
        .unwrap();
        receive_echo(&ctx, &serde_json::to_string(&envelope).unwrap()).await;

        let agent = ctx.directory.get(AgentClass::Device, &peer).unwrap();
        assert_eq!(agent.status, ActivityStatus::Active);
    }

    #[tokio::test]
    async fn offline_mark_for_unknown_agents_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (_our_read, our_write) = tokio::io::split(ours);
        let (mut peer_read, _peer_write) = tokio::io::split(theirs);
        let browser = SocketConnection::new("browser-1", AgentClass::Browser, our_write, false);
        ctx.registry.insert(browser).await;

        mark_offline(&ctx, AgentClass::Device, &"f".repeat(128)).await;

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), frame::read_frame(&mut peer_read))
                .await;
        assert!(outcome.is_err(), "nothing should reach the browsers");
    }
}
