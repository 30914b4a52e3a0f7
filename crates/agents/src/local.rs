//! This node's own identity, minted once and persisted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::DirectoryError;
use crate::identity;

const IDENTITY_FILE: &str = "identity.json";

/// The user and device hashes this node answers as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub hash_device: String,
    pub hash_user: String,
    pub name_device: String,
    pub name_user: String,
}

impl LocalIdentity {
    /// Loads the stored identity, or mints and persists a fresh one.
    ///
    /// Minting happens exactly once per installation; the nanosecond
    /// salt in the user hash makes a re-mint a different identity.
    pub fn load_or_mint(
        state_dir: &Path,
        user_name: &str,
        device_name: &str,
    ) -> Result<Self, DirectoryError> {
        let path = state_dir.join(IDENTITY_FILE);
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            return Ok(serde_json::from_str(&data)?);
        }

        let hash_user = identity::mint_user(user_name);
        let hash_device = identity::mint_device(&hash_user, device_name);
        let minted = Self {
            hash_device,
            hash_user,
            name_device: device_name.to_string(),
            name_user: user_name.to_string(),
        };
        std::fs::create_dir_all(state_dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(&minted)?)?;
        info!(device = %minted.name_device, user = %minted.name_user, "minted node identity");
        Ok(minted)
    }

    /// Mints a fresh identity under new display names and replaces the
    /// stored one. Running services keep the identity they started
    /// with; the new one takes effect on the next launch.
    pub fn remint(
        state_dir: &Path,
        user_name: &str,
        device_name: &str,
    ) -> Result<Self, DirectoryError> {
        let hash_user = identity::mint_user(user_name);
        let hash_device = identity::mint_device(&hash_user, device_name);
        let minted = Self {
            hash_device,
            hash_user,
            name_device: device_name.to_string(),
            name_user: user_name.to_string(),
        };
        std::fs::create_dir_all(state_dir)?;
        std::fs::write(
            state_dir.join(IDENTITY_FILE),
            serde_json::to_string_pretty(&minted)?,
        )?;
        info!(device = %minted.name_device, user = %minted.name_user, "reminted node identity");
        Ok(minted)
    }

    /// Whether a hash names this node, as either its device or user.
    pub fn matches(&self, hash: &str) -> bool {
        hash == self.hash_device || hash == self.hash_user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_once_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let first = LocalIdentity::load_or_mint(tmp.path(), "alice", "laptop").unwrap();
        assert_eq!(first.hash_user.len(), 128);
        assert_eq!(first.hash_device.len(), 128);
        assert_ne!(first.hash_user, first.hash_device);

        let second = LocalIdentity::load_or_mint(tmp.path(), "alice", "laptop").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn remint_replaces_the_stored_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let first = LocalIdentity::load_or_mint(tmp.path(), "alice", "laptop").unwrap();
        let second = LocalIdentity::remint(tmp.path(), "bob", "desktop").unwrap();
        assert_ne!(first.hash_user, second.hash_user);
        assert_eq!(second.name_user, "bob");

        let reloaded = LocalIdentity::load_or_mint(tmp.path(), "ignored", "ignored").unwrap();
        assert_eq!(reloaded, second);
    }

    #[test]
    fn matches_either_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let identity = LocalIdentity::load_or_mint(tmp.path(), "alice", "laptop").unwrap();
        assert!(identity.matches(&identity.hash_device));
        assert!(identity.matches(&identity.hash_user));
        assert!(!identity.matches("somebody-else"));
    }
}
