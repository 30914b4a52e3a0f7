use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed GUID appended to the client key when computing the handshake
/// accept digest (RFC 6455 section 1.3).
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Outbound payloads larger than this are split across continuation
/// frames when writing to device or user peers.
pub const FRAGMENT_THRESHOLD: usize = 1_000_000;

/// Subprotocol prefix announced by local browser sockets:
/// `Sec-WebSocket-Protocol: browser-<deviceHash>`.
pub const BROWSER_PROTOCOL_PREFIX: &str = "browser-";

/// Sentinel subprotocol that bypasses directory membership checks, used
/// by the browser test harness.
pub const TEST_BROWSER_PROTOCOL: &str = "test-browser";

/// Local inactivity window before an `active` agent turns `idle`.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(15);

/// Client timeout for presence checks.
pub const ONLINE_TIMEOUT: Duration = Duration::from_secs(1);

/// Client timeout for copy-class transfers.
pub const COPY_TIMEOUT: Duration = Duration::from_secs(7200);

/// Client timeout for everything else.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity headers attached to forwarded requests.
pub const HEADER_AGENT_HASH: &str = "agent-hash";
pub const HEADER_AGENT_NAME: &str = "agent-name";
pub const HEADER_AGENT_TYPE: &str = "agent-type";
pub const HEADER_REQUEST_TYPE: &str = "request-type";

/// Headers carried by file-transfer responses.
pub const HEADER_COMPRESSION: &str = "compression";
pub const HEADER_CUT_PATH: &str = "cut_path";
pub const HEADER_FILE_NAME: &str = "file_name";
pub const HEADER_FILE_SIZE: &str = "file_size";
pub const HEADER_HASH: &str = "hash";
pub const HEADER_RESPONSE_TYPE: &str = "response-type";

/// Service name declared by every envelope.
///
/// The set is closed on purpose: a message naming anything else fails to
/// deserialize and the receiving side destroys the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    AgentHash,
    AgentOnline,
    AgentStatus,
    Copy,
    CopyList,
    FileSystem,
    FileSystemDetails,
    FileSystemStatus,
    FileSystemString,
    HashShare,
    Invite,
    Log,
    Message,
    Settings,
    TestBrowser,
}

impl Service {
    /// Wire name of the service, as used in envelopes and the
    /// `request-type` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::AgentHash => "agent-hash",
            Service::AgentOnline => "agent-online",
            Service::AgentStatus => "agent-status",
            Service::Copy => "copy",
            Service::CopyList => "copy-list",
            Service::FileSystem => "file-system",
            Service::FileSystemDetails => "file-system-details",
            Service::FileSystemStatus => "file-system-status",
            Service::FileSystemString => "file-system-string",
            Service::HashShare => "hash-share",
            Service::Invite => "invite",
            Service::Log => "log",
            Service::Message => "message",
            Service::Settings => "settings",
            Service::TestBrowser => "test-browser",
        }
    }

    /// Client-side timeout for a forwarded request of this service.
    ///
    /// Presence checks give up fast, copy transfers may run for hours.
    pub fn timeout(&self) -> Duration {
        match self {
            Service::AgentOnline => ONLINE_TIMEOUT,
            Service::Copy | Service::CopyList => COPY_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
