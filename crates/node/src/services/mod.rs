//! Mesh service handlers: identity, presence, invitations, relays and
//! settings. File and copy traffic lives in `sharemesh-file-service`.

pub mod identity;
pub mod invite;
pub mod presence;
pub mod relay;
pub mod settings;
