//! Persistent directory of known devices and users.
//!
//! Membership here is what authorizes a socket: a peer whose hash is
//! in neither map is refused at the handshake. Entries are cached in
//! memory and written through to JSON files in the state directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use sharemesh_protocol::types::{ActivityStatus, Agent, AgentClass, Share};

/// Errors from directory persistence.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

const DEVICES_FILE: &str = "devices.json";
const USERS_FILE: &str = "users.json";

/// Known peers, split by class. Browsers are local UI tabs and never
/// appear here.
pub struct AgentDirectory {
    state_dir: PathBuf,
    devices: RwLock<HashMap<String, Agent>>,
    users: RwLock<HashMap<String, Agent>>,
}

impl AgentDirectory {
    /// Opens the directory, loading any persisted maps.
    pub fn open(state_dir: &Path) -> Result<Self, DirectoryError> {
        let devices = load_map(&state_dir.join(DEVICES_FILE))?;
        let users = load_map(&state_dir.join(USERS_FILE))?;
        debug!(
            devices = devices.len(),
            users = users.len(),
            "agent directory loaded"
        );
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            devices: RwLock::new(devices),
            users: RwLock::new(users),
        })
    }

    fn map(&self, class: AgentClass) -> Option<&RwLock<HashMap<String, Agent>>> {
        match class {
            AgentClass::Device => Some(&self.devices),
            AgentClass::User => Some(&self.users),
            AgentClass::Browser => None,
        }
    }

    /// Looks up a peer by class and hash.
    pub fn get(&self, class: AgentClass, hash: &str) -> Option<Agent> {
        self.map(class)?.read().unwrap().get(hash).cloned()
    }

    pub fn contains(&self, class: AgentClass, hash: &str) -> bool {
        self.map(class)
            .is_some_and(|map| map.read().unwrap().contains_key(hash))
    }

    /// Adds or replaces a peer and persists the map.
    pub fn insert(
        &self,
        class: AgentClass,
        hash: &str,
        agent: Agent,
    ) -> Result<(), DirectoryError> {
        let Some(map) = self.map(class) else {
            return Ok(());
        };
        map.write().unwrap().insert(hash.to_string(), agent);
        self.persist(class)
    }

    /// Removes a peer and persists the map.
    pub fn remove(
        &self,
        class: AgentClass,
        hash: &str,
    ) -> Result<Option<Agent>, DirectoryError> {
        let Some(map) = self.map(class) else {
            return Ok(None);
        };
        let removed = map.write().unwrap().remove(hash);
        if removed.is_some() {
            self.persist(class)?;
        }
        Ok(removed)
    }

    /// Snapshot of one class's map.
    pub fn all(&self, class: AgentClass) -> HashMap<String, Agent> {
        self.map(class)
            .map(|map| map.read().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn hashes(&self, class: AgentClass) -> Vec<String> {
        self.map(class)
            .map(|map| map.read().unwrap().keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Updates a peer's activity status in memory. Liveness is runtime
    /// state; every peer starts offline after a restart, so this is
    /// deliberately not written through.
    pub fn set_status(&self, class: AgentClass, hash: &str, status: ActivityStatus) -> bool {
        let Some(map) = self.map(class) else {
            return false;
        };
        match map.write().unwrap().get_mut(hash) {
            Some(agent) => {
                agent.status = status;
                true
            }
            None => false,
        }
    }

    /// Updates the address and ports a peer last announced from, and
    /// persists so the next restart can still reach it.
    pub fn set_endpoint(
        &self,
        class: AgentClass,
        hash: &str,
        agent: &Agent,
    ) -> Result<bool, DirectoryError> {
        let Some(map) = self.map(class) else {
            return Ok(false);
        };
        let updated = {
            let mut map = map.write().unwrap();
            match map.get_mut(hash) {
                Some(entry) => {
                    entry.ip_all = agent.ip_all.clone();
                    entry.ip_selected = agent.ip_selected.clone();
                    entry.ports = agent.ports;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist(class)?;
        }
        Ok(updated)
    }

    /// Replaces a device's share table and persists it.
    pub fn set_shares(
        &self,
        class: AgentClass,
        hash: &str,
        shares: HashMap<String, Share>,
    ) -> Result<bool, DirectoryError> {
        let Some(map) = self.map(class) else {
            return Ok(false);
        };
        let updated = {
            let mut map = map.write().unwrap();
            match map.get_mut(hash) {
                Some(entry) => {
                    entry.shares = shares;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist(class)?;
        }
        Ok(updated)
    }

    /// Finds the share with the given identifier across all devices.
    pub fn find_share(&self, share_hash: &str) -> Option<(String, Share)> {
        let devices = self.devices.read().unwrap();
        for (device_hash, agent) in devices.iter() {
            if agent.shares.contains_key(share_hash) {
                return Some((device_hash.clone(), agent.shares[share_hash].clone()));
            }
        }
        None
    }

    fn persist(&self, class: AgentClass) -> Result<(), DirectoryError> {
        let (file, map) = match class {
            AgentClass::Device => (DEVICES_FILE, &self.devices),
            AgentClass::User => (USERS_FILE, &self.users),
            AgentClass::Browser => return Ok(()),
        };
        let map = map.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::write(self.state_dir.join(file), json)?;
        debug!("persisted {} {class} agent(s)", map.len());
        Ok(())
    }
}

fn load_map(path: &Path) -> Result<HashMap<String, Agent>, DirectoryError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharemesh_protocol::types::{AddressList, PathKind, Ports};

    fn test_agent(name: &str) -> Agent {
        Agent {
            ip_all: AddressList {
                ipv4: vec!["192.168.1.10".into()],
                ipv6: vec![],
            },
            ip_selected: "192.168.1.10".into(),
            name: name.into(),
            ports: Ports { http: 80, ws: 443 },
            shares: HashMap::new(),
            status: ActivityStatus::Offline,
        }
    }

    fn test_directory() -> (tempfile::TempDir, AgentDirectory) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::open(tmp.path()).unwrap();
        (tmp, dir)
    }

    #[test]
    fn empty_directory() {
        let (_tmp, dir) = test_directory();
        assert!(!dir.contains(AgentClass::Device, "x"));
        assert!(dir.all(AgentClass::Device).is_empty());
        assert!(dir.all(AgentClass::User).is_empty());
    }

    #[test]
    fn insert_and_lookup_by_class() {
        let (_tmp, dir) = test_directory();
        dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
            .unwrap();
        dir.insert(AgentClass::User, "u1", test_agent("alice"))
            .unwrap();

        assert!(dir.contains(AgentClass::Device, "d1"));
        assert!(!dir.contains(AgentClass::User, "d1"));
        assert_eq!(dir.get(AgentClass::User, "u1").unwrap().name, "alice");
        assert!(dir.get(AgentClass::Browser, "u1").is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = AgentDirectory::open(tmp.path()).unwrap();
            dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
                .unwrap();
            dir.insert(AgentClass::User, "u1", test_agent("alice"))
                .unwrap();
        }

        let reopened = AgentDirectory::open(tmp.path()).unwrap();
        assert!(reopened.contains(AgentClass::Device, "d1"));
        assert!(reopened.contains(AgentClass::User, "u1"));
        assert_eq!(
            reopened.get(AgentClass::Device, "d1").unwrap().name,
            "laptop"
        );
    }

    #[test]
    fn remove_persists() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = AgentDirectory::open(tmp.path()).unwrap();
            dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
                .unwrap();
            let removed = dir.remove(AgentClass::Device, "d1").unwrap();
            assert_eq!(removed.unwrap().name, "laptop");
        }
        let reopened = AgentDirectory::open(tmp.path()).unwrap();
        assert!(!reopened.contains(AgentClass::Device, "d1"));
    }

    #[test]
    fn status_updates_are_runtime_only() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = AgentDirectory::open(tmp.path()).unwrap();
            dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
                .unwrap();
            assert!(dir.set_status(AgentClass::Device, "d1", ActivityStatus::Active));
            assert_eq!(
                dir.get(AgentClass::Device, "d1").unwrap().status,
                ActivityStatus::Active
            );
        }
        let reopened = AgentDirectory::open(tmp.path()).unwrap();
        assert_eq!(
            reopened.get(AgentClass::Device, "d1").unwrap().status,
            ActivityStatus::Offline
        );
    }

    #[test]
    fn set_status_unknown_agent() {
        let (_tmp, dir) = test_directory();
        assert!(!dir.set_status(AgentClass::Device, "ghost", ActivityStatus::Idle));
    }

    #[test]
    fn endpoint_update_persists() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = AgentDirectory::open(tmp.path()).unwrap();
            dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
                .unwrap();
            let mut moved = test_agent("laptop");
            moved.ip_selected = "10.0.0.9".into();
            moved.ports = Ports {
                http: 8080,
                ws: 8443,
            };
            assert!(dir.set_endpoint(AgentClass::Device, "d1", &moved).unwrap());
        }
        let reopened = AgentDirectory::open(tmp.path()).unwrap();
        let agent = reopened.get(AgentClass::Device, "d1").unwrap();
        assert_eq!(agent.ip_selected, "10.0.0.9");
        assert_eq!(agent.ports.http, 8080);
    }

    #[test]
    fn shares_update_and_share_lookup() {
        let (_tmp, dir) = test_directory();
        dir.insert(AgentClass::Device, "d1", test_agent("laptop"))
            .unwrap();

        let mut shares = HashMap::new();
        shares.insert(
            "share-1".to_string(),
            Share {
                execute: false,
                name: "/srv/media".into(),
                read_only: true,
                kind: PathKind::Directory,
            },
        );
        assert!(
            dir.set_shares(AgentClass::Device, "d1", shares)
                .unwrap()
        );

        let (device, share) = dir.find_share("share-1").unwrap();
        assert_eq!(device, "d1");
        assert_eq!(share.name, "/srv/media");
        assert!(dir.find_share("share-2").is_none());
    }
}
