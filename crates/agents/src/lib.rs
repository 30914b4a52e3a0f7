//! Agent identity and the persistent peer directory.
//!
//! Nodes mint SHA3-512 identities once per installation, keep a
//! directory of the devices and users they have been introduced to,
//! and refuse sockets from anyone else.

pub mod addresses;
pub mod directory;
pub mod identity;
pub mod local;

pub use addresses::local_addresses;
pub use directory::{AgentDirectory, DirectoryError};
pub use local::LocalIdentity;
