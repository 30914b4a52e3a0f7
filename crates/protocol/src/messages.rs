use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::types::{ActivityStatus, AddressList, AgentClass, AgentRef, PathKind, Ports, Share};

// ---------------------------------------------------------------------------
// File system operations
// ---------------------------------------------------------------------------

/// Action requested against a filesystem artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    FsBase64,
    FsClose,
    FsCopy,
    FsCut,
    FsDestroy,
    FsDetails,
    FsDirectory,
    FsExecute,
    FsHash,
    FsNew,
    FsRead,
    FsRename,
    FsSearch,
    FsWrite,
}

impl FileAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::FsBase64 => "fs-base64",
            FileAction::FsClose => "fs-close",
            FileAction::FsCopy => "fs-copy",
            FileAction::FsCut => "fs-cut",
            FileAction::FsDestroy => "fs-destroy",
            FileAction::FsDetails => "fs-details",
            FileAction::FsDirectory => "fs-directory",
            FileAction::FsExecute => "fs-execute",
            FileAction::FsHash => "fs-hash",
            FileAction::FsNew => "fs-new",
            FileAction::FsRead => "fs-read",
            FileAction::FsRename => "fs-rename",
            FileAction::FsSearch => "fs-search",
            FileAction::FsWrite => "fs-write",
        }
    }
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file-system operation request.
///
/// `name` is the action-specific argument: the artifact kind for
/// `fs-new`, the replacement name for `fs-rename`, the search fragment
/// for `fs-search`, the content for `fs-write`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub action: FileAction,
    pub agent: AgentRef,
    /// Recursion limit; 0 means unbounded for enumeration actions and
    /// flat for search.
    pub depth: usize,
    pub id: String,
    pub location: Vec<String>,
    #[serde(default)]
    pub name: String,
    /// Path to watch for changes, set by `fs-directory` navigation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<String>,
}

/// One artifact in a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
    /// Index of the parent entry within the same listing.
    pub parent: usize,
    /// Immediate child count for directories, 0 otherwise.
    pub children: u64,
    pub size: u64,
    /// Modification time, milliseconds since the epoch.
    pub modified: i64,
}

/// Marker returned in place of a listing when the target cannot be
/// served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryMarker {
    #[serde(rename = "missing")]
    Missing,
    #[serde(rename = "noShare")]
    NoShare,
    #[serde(rename = "readOnly")]
    ReadOnly,
}

/// Listing payload: entries on success, a marker string otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectoryResult {
    Entries(Vec<DirectoryEntry>),
    Marker(DirectoryMarker),
}

/// Directory details delivered back to the requesting UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsDetails {
    pub dirs: DirectoryResult,
    pub id: String,
}

/// Progress or completion status for file and copy operations,
/// broadcast to interested peers and their UIs.
///
/// `address` names the directory the status pertains to so an open
/// view of that path can refresh itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub address: String,
    pub agent: String,
    pub agent_type: AgentClass,
    /// Integrity failures so far; the source reads this from the final
    /// status to decide whether a cut may remove its files.
    #[serde(default)]
    pub failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_list: Option<DirectoryResult>,
    pub message: String,
}

/// String-producing operation result (`fs-read`, `fs-hash`,
/// `fs-base64`), one item per requested location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringItem {
    pub content: String,
    pub id: String,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Copy / cut
// ---------------------------------------------------------------------------

/// Initiates a copy or cut job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub agent_source: AgentRef,
    pub agent_write: AgentRef,
    pub cut: bool,
    pub location: Vec<String>,
}

/// One artifact in a copy manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Absolute path on the source agent.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
    /// Path relative to the selection root, used to derive the
    /// destination path.
    pub relative: String,
    pub size: u64,
}

/// The sorted manifest plus totals, sent to the write agent once
/// enumeration completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyManifest {
    pub agent_source: AgentRef,
    pub agent_write: AgentRef,
    pub cut: bool,
    pub directories: u64,
    pub file_count: u64,
    pub file_size: u64,
    pub id: String,
    pub list: Vec<ManifestEntry>,
}

/// Pulls one file's bytes from the source agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFileRequest {
    pub agent: AgentRef,
    /// Compression level the writer asks the source to apply; 0 sends
    /// the bytes raw.
    pub compression: i32,
    pub cut: bool,
    /// Absolute path on the source agent.
    pub file_location: String,
    /// Relative destination path.
    pub file_name: String,
    pub id: String,
    pub size: u64,
}

/// Copy-service payload, discriminated by its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum CopyMessage {
    Copy(CopyRequest),
    CopyFile(CopyFileRequest),
    CopyRequestFiles(CopyManifest),
}

// ---------------------------------------------------------------------------
// Presence and identity
// ---------------------------------------------------------------------------

/// Point-in-time agent activity, optionally carrying the sender's share
/// list for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub agent: String,
    pub agent_type: AgentClass,
    /// When set, the receiving node fans the status out to every agent
    /// it knows.
    pub broadcast: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<HashMap<String, Share>>,
    pub status: ActivityStatus,
}

/// Mints a fresh local identity pair from display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHashRequest {
    pub device: String,
    pub user: String,
}

/// The minted identity hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHashResponse {
    pub device: String,
    pub user: String,
}

/// Presence check: the caller sends its known addresses, the responder
/// replaces them with its own view plus the address the exchange
/// actually arrived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOnline {
    pub agent: String,
    pub agent_type: AgentClass,
    pub ip_all: AddressList,
    #[serde(default)]
    pub ip_selected: String,
    pub ports: Ports,
}

/// Requests a share identifier for a newly exposed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashShareRequest {
    pub device: String,
    pub share: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
}

/// The minted share identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashShareResponse {
    pub device: String,
    pub hash: String,
    pub share: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
}

// ---------------------------------------------------------------------------
// Invitation
// ---------------------------------------------------------------------------

/// Step of the four-way introduction between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InviteAction {
    #[serde(rename = "invite-request")]
    Request,
    #[serde(rename = "invite-ask")]
    Ask,
    #[serde(rename = "invite-answer")]
    Answer,
    #[serde(rename = "invite-complete")]
    Complete,
}

/// Outcome of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Accepted,
    Declined,
    Ignored,
    Invited,
}

impl InviteStatus {
    /// Wire name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Accepted => "accepted",
            InviteStatus::Declined => "declined",
            InviteStatus::Ignored => "ignored",
            InviteStatus::Invited => "invited",
        }
    }
}

impl std::fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity block each side contributes during an invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteIdentity {
    pub hash_device: String,
    pub hash_user: String,
    pub ip_all: AddressList,
    #[serde(default)]
    pub ip_selected: String,
    pub name_device: String,
    pub name_user: String,
    pub ports: Ports,
    #[serde(default)]
    pub shares: HashMap<String, Share>,
}

/// Agent introduction message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub action: InviteAction,
    pub agent_request: InviteIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<InviteIdentity>,
    /// Whether a device or user relationship is being established.
    #[serde(rename = "type")]
    pub class: AgentClass,
    #[serde(default)]
    pub message: String,
    pub status: InviteStatus,
}

// ---------------------------------------------------------------------------
// Messaging, settings, harness
// ---------------------------------------------------------------------------

/// One text message relayed between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    pub agent_from: String,
    pub agent_to: String,
    pub agent_type: AgentClass,
    /// Milliseconds since the epoch.
    pub date: i64,
    pub message: String,
}

/// Which stored document a settings write replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsKind {
    Configuration,
    Device,
    Message,
    User,
}

impl SettingsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsKind::Configuration => "configuration",
            SettingsKind::Device => "device",
            SettingsKind::Message => "message",
            SettingsKind::User => "user",
        }
    }
}

/// Persists a settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub settings: Box<RawValue>,
    #[serde(rename = "type")]
    pub kind: SettingsKind,
}

/// Browser test-harness echo payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBrowser {
    pub action: String,
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<serde_json::Value>,
}
