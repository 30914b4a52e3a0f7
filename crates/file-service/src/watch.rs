//! Directory watchers feeding change refreshes to browser views.
//!
//! Each open view watches its current directory, non-recursively. A
//! change produces a debounced depth-2 listing pushed to every browser
//! socket; peers are not told, they learn through the status
//! broadcasts of the operations that caused the change.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::{DirectoryResult, FileStatus};
use sharemesh_protocol::types::AgentClass;
use sharemesh_websocket::SocketRegistry;

use crate::local;

/// Quiet period before a change turns into a listing push; edits tend
/// to arrive in bursts.
const DEBOUNCE: Duration = Duration::from_millis(150);

/// The live watchers, keyed by watched directory.
pub struct WatchRegistry {
    events: mpsc::UnboundedSender<PathBuf>,
    watches: StdMutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl WatchRegistry {
    /// Creates the registry and spawns its refresh task, so this must
    /// run inside a runtime.
    pub fn new(device: &str, registry: Arc<SocketRegistry>) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(refresh_loop(device.to_string(), registry, receiver));
        Self {
            events,
            watches: StdMutex::new(HashMap::new()),
        }
    }

    /// Follows a view's navigation: the previously watched path, when
    /// given and different, is released before the new location gains
    /// a watcher.
    pub fn replace(&self, previous: &str, location: &str) {
        if !previous.is_empty() && previous != location {
            self.close(previous);
        }
        self.watch(location);
    }

    /// Registers a non-recursive watcher on `location`; a second
    /// registration of the same path is a noop.
    pub fn watch(&self, location: &str) {
        let path = PathBuf::from(location);
        let mut watches = self.watches.lock().unwrap();
        if watches.contains_key(&path) {
            return;
        }
        let events = self.events.clone();
        let root = path.clone();
        let built = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
            match event {
                // Reads of the directory do not count, or the refresh
                // listing itself would retrigger the watch.
                Ok(event) if changes_content(&event.kind) => {
                    let _ = events.send(root.clone());
                }
                Ok(_) => {}
                Err(error) => debug!("watch event error: {error}"),
            }
        });
        match built {
            Ok(mut watcher) => match watcher.watch(&path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!(path = location, "watch opened");
                    watches.insert(path, watcher);
                }
                Err(error) => warn!(path = location, "watch failed: {error}"),
            },
            Err(error) => warn!(path = location, "watcher create failed: {error}"),
        }
    }

    /// Drops the watcher on `location`, reporting whether one existed.
    pub fn close(&self, location: &str) -> bool {
        let removed = self
            .watches
            .lock()
            .unwrap()
            .remove(Path::new(location))
            .is_some();
        if removed {
            debug!(path = location, "watch closed");
        }
        removed
    }

    pub fn is_watched(&self, location: &str) -> bool {
        self.watches
            .lock()
            .unwrap()
            .contains_key(Path::new(location))
    }

    pub fn len(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.lock().unwrap().is_empty()
    }
}

fn changes_content(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Debounces change notices and pushes refreshed listings to browser
/// sockets.
async fn refresh_loop(
    device: String,
    registry: Arc<SocketRegistry>,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
) {
    while let Some(first) = events.recv().await {
        tokio::time::sleep(DEBOUNCE).await;
        let mut changed: HashSet<PathBuf> = HashSet::from([first]);
        while let Ok(extra) = events.try_recv() {
            changed.insert(extra);
        }
        for root in changed {
            push_refresh(&device, &registry, &root).await;
        }
    }
}

async fn push_refresh(device: &str, registry: &SocketRegistry, root: &Path) {
    let path = root.to_path_buf();
    let entries = match tokio::task::spawn_blocking(move || sharemesh_file_ops::list(&path, 2)).await
    {
        Ok(Ok(entries)) => entries,
        Ok(Err(error)) => {
            // Watched directories get destroyed; their watcher follows
            // through fs-destroy or fs-close, not from here.
            debug!(path = %root.display(), "watched path unlistable: {error}");
            return;
        }
        Err(error) => {
            debug!("listing task failed: {error}");
            return;
        }
    };
    let message = local::listing_message(&entries);
    let status = FileStatus {
        address: root.display().to_string(),
        agent: device.to_string(),
        agent_type: AgentClass::Device,
        failures: 0,
        file_list: Some(DirectoryResult::Entries(entries)),
        message,
    };
    match ServiceMessage::new(Service::FileSystemStatus, &status) {
        Ok(envelope) => registry.broadcast(AgentClass::Browser, &envelope).await,
        Err(error) => debug!("status encode failed: {error}"),
    }
}
