//! Local activity state machine.
//!
//! Browser interaction marks this node active; a threshold of silence
//! marks it idle. Transitions announce the new status once, with the
//! local share table riding along so remote peers can reconcile
//! theirs.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sharemesh_protocol::messages::StatusMessage;
use sharemesh_protocol::types::{ActivityStatus, AgentClass};

use crate::{StatusContext, fanout};

/// Watches local interaction and announces active/idle transitions.
///
/// Starts active, the state a node is in the moment someone launches
/// it.
pub struct ActivityMonitor {
    cancel: CancellationToken,
    status: Arc<StdMutex<ActivityStatus>>,
    touch_tx: mpsc::UnboundedSender<()>,
}

impl ActivityMonitor {
    /// Starts the idle watch, so this must run inside a runtime.
    pub fn new(ctx: StatusContext, threshold: Duration) -> Self {
        let cancel = CancellationToken::new();
        let status = Arc::new(StdMutex::new(ActivityStatus::Active));
        let (touch_tx, touch_rx) = mpsc::unbounded_channel();
        tokio::spawn(idle_watch(
            ctx,
            Arc::clone(&status),
            touch_rx,
            threshold,
            cancel.clone(),
        ));
        Self {
            cancel,
            status,
            touch_tx,
        }
    }

    /// Records one local interaction. Cheap enough to call for every
    /// browser event.
    pub fn touch(&self) {
        let _ = self.touch_tx.send(());
    }

    /// The node's own activity right now.
    pub fn status(&self) -> ActivityStatus {
        *self.status.lock().unwrap()
    }

    /// Stops the idle watch. Announces nothing; peers will notice the
    /// silence on their own.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Runs until cancelled. Any interaction restarts the clock; a full
/// threshold of silence tips the node into idle.
async fn idle_watch(
    ctx: StatusContext,
    status: Arc<StdMutex<ActivityStatus>>,
    mut touch_rx: mpsc::UnboundedReceiver<()>,
    threshold: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            touched = touch_rx.recv() => {
                if touched.is_none() {
                    break;
                }
                if transition(&status, ActivityStatus::Active) {
                    announce(&ctx, ActivityStatus::Active).await;
                }
            }
            _ = tokio::time::sleep(threshold) => {
                if transition(&status, ActivityStatus::Idle) {
                    announce(&ctx, ActivityStatus::Idle).await;
                }
            }
        }
    }
}

/// Flips the stored status, reporting whether anything changed. An
/// unchanged status is not reannounced.
fn transition(status: &StdMutex<ActivityStatus>, next: ActivityStatus) -> bool {
    let mut current = status.lock().unwrap();
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

async fn announce(ctx: &StatusContext, status: ActivityStatus) {
    let shares = ctx
        .directory
        .get(AgentClass::Device, &ctx.identity.hash_device)
        .map(|agent| agent.shares);
    let message = StatusMessage {
        agent: ctx.identity.hash_device.clone(),
        agent_type: AgentClass::Device,
        broadcast: true,
        shares,
        status,
    };
    if let Err(error) = fanout::apply_status(ctx, message).await {
        debug!(?status, "transition announce failed: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use sharemesh_agents::{AgentDirectory, LocalIdentity};
    use sharemesh_protocol::ServiceMessage;
    use sharemesh_protocol::constants::Service;
    use sharemesh_protocol::types::{AddressList, Agent, Ports};
    use sharemesh_websocket::{SocketConnection, SocketRegistry, frame};

    const THRESHOLD: Duration = Duration::from_secs(15);

    fn context(state: &std::path::Path) -> StatusContext {
        let identity = LocalIdentity::load_or_mint(state, "alice", "laptop").unwrap();
        let directory = Arc::new(AgentDirectory::open(state).unwrap());
        StatusContext::new(identity, directory, Arc::new(SocketRegistry::new())).unwrap()
    }

    /// Seeds the local device's own directory record so transitions
    /// have something to update.
    fn seed_self(ctx: &StatusContext) {
        ctx.directory
            .insert(
                AgentClass::Device,
                &ctx.identity.hash_device,
                Agent {
                    ip_all: AddressList::default(),
                    ip_selected: String::new(),
                    name: "laptop".into(),
                    ports: Ports::default(),
                    shares: HashMap::new(),
                    status: ActivityStatus::Active,
                },
            )
            .unwrap();
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn transition_reports_change_only() {
        let status = StdMutex::new(ActivityStatus::Active);
        assert!(!transition(&status, ActivityStatus::Active));
        assert!(transition(&status, ActivityStatus::Idle));
        assert!(!transition(&status, ActivityStatus::Idle));
        assert!(transition(&status, ActivityStatus::Active));
    }

    #[tokio::test]
    async fn starts_active() {
        let tmp = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(context(tmp.path()), THRESHOLD);
        assert_eq!(monitor.status(), ActivityStatus::Active);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn silence_tips_idle() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        seed_self(&ctx);
        let hash = ctx.identity.hash_device.clone();
        let directory = Arc::clone(&ctx.directory);
        let monitor = ActivityMonitor::new(ctx, THRESHOLD);

        tokio::time::advance(THRESHOLD).await;
        settle().await;

        assert_eq!(monitor.status(), ActivityStatus::Idle);
        let own = directory.get(AgentClass::Device, &hash).unwrap();
        assert_eq!(own.status, ActivityStatus::Idle);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn interaction_restores_active() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(context(tmp.path()), THRESHOLD);

        tokio::time::advance(THRESHOLD).await;
        settle().await;
        assert_eq!(monitor.status(), ActivityStatus::Idle);

        monitor.touch();
        settle().await;
        assert_eq!(monitor.status(), ActivityStatus::Active);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn interaction_resets_the_clock() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(context(tmp.path()), THRESHOLD);

        tokio::time::advance(THRESHOLD - Duration::from_secs(1)).await;
        settle().await;
        monitor.touch();
        settle().await;

        // The touch restarted the clock, so the original deadline
        // passing changes nothing.
        tokio::time::advance(THRESHOLD - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(monitor.status(), ActivityStatus::Active);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(monitor.status(), ActivityStatus::Idle);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn transitions_reach_browser_sockets() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let expected = ctx.identity.hash_device.clone();

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (_our_read, our_write) = tokio::io::split(ours);
        let (mut peer_read, _peer_write) = tokio::io::split(theirs);
        let browser = SocketConnection::new("browser-1", AgentClass::Browser, our_write, false);
        ctx.registry.insert(browser).await;

        let monitor = ActivityMonitor::new(ctx, THRESHOLD);
        tokio::time::advance(THRESHOLD).await;
        settle().await;

        let frame = frame::read_frame(&mut peer_read).await.unwrap();
        let envelope: ServiceMessage = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(envelope.service, Service::AgentStatus);
        let status: StatusMessage = envelope.parse().unwrap();
        assert_eq!(status.agent, expected);
        assert_eq!(status.agent_type, AgentClass::Device);
        assert_eq!(status.status, ActivityStatus::Idle);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_the_watch() {
        tokio::time::pause();
        let tmp = tempfile::tempdir().unwrap();
        let monitor = ActivityMonitor::new(context(tmp.path()), THRESHOLD);

        monitor.shutdown();
        settle().await;
        tokio::time::advance(THRESHOLD * 2).await;
        settle().await;

        assert_eq!(monitor.status(), ActivityStatus::Active);
    }
}
