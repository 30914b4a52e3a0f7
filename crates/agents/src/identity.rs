//! Hash minting for agents and shares.
//!
//! Every identifier on the mesh is a 128-character SHA3-512 hex
//! digest. User hashes are salted with the machine and a nanosecond
//! timestamp at first launch, so two accounts with the same display
//! name never collide; everything else derives from that root.

use std::time::{SystemTime, UNIX_EPOCH};

use sha3::{Digest, Sha3_512};

/// Hex digest of the concatenated parts.
fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha3_512::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn millis_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into())
}

/// Mints a user hash from the account name, the machine, the platform
/// and the current nanosecond clock. Not reproducible on purpose.
pub fn mint_user(user_name: &str) -> String {
    digest(&[
        user_name,
        &machine_name(),
        std::env::consts::OS,
        &nanos_now().to_string(),
    ])
}

/// Derives a device hash from the owning user's hash and the device
/// display name.
pub fn mint_device(user_hash: &str, device_name: &str) -> String {
    digest(&[user_hash, device_name])
}

/// Derives the stable identifier of a share from its owner and target.
pub fn mint_share(user_hash: &str, device_hash: &str, kind: &str, path: &str) -> String {
    digest(&[user_hash, device_hash, kind, path])
}

/// Mints a one-off authorization token for a cross-user copy, salted
/// with the millisecond clock.
pub fn mint_copy_token(user_hash: &str, device_hash: &str) -> String {
    digest(&[user_hash, device_hash, &millis_now().to_string()])
}
