pub mod constants;
pub mod envelope;
pub mod format;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::Service;
pub use envelope::ServiceMessage;
pub use types::{ActivityStatus, Agent, AgentClass, AgentRef, PathKind, Ports, Share};
