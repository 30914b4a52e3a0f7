//! Hand-rolled WebSocket transport.
//!
//! Implements the subset of RFC 6455 the mesh speaks: the opening
//! handshake (with agent identity carried in headers or the
//! subprotocol), a sequential frame pump with ordered fragment
//! reassembly, and a per-node registry of live sockets.

mod error;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod socket;

pub use error::SocketError;
pub use frame::{Frame, MAX_PAYLOAD, Opcode};
pub use handshake::Offer;
pub use registry::SocketRegistry;
pub use socket::{MessageSink, SinkFuture, SocketConnection, SocketStatus};
