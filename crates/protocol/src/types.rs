use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Class of a participating agent.
///
/// Devices and users route file operations; `browser` exists only for
/// local UI sockets and never appears as a file-routing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    Browser,
    Device,
    User,
}

impl AgentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentClass::Browser => "browser",
            AgentClass::Device => "device",
            AgentClass::User => "user",
        }
    }
}

impl std::fmt::Display for AgentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time activity of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Idle,
    Offline,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Active => "active",
            ActivityStatus::Idle => "idle",
            ActivityStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of filesystem artifact an entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Directory,
    Error,
    File,
    Link,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Directory => "directory",
            PathKind::Error => "error",
            PathKind::File => "file",
            PathKind::Link => "link",
        }
    }
}

/// Reference to an agent inside a file or copy request: who owns the
/// paths being touched and under which share authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub id: String,
    /// Directory the requesting view is anchored at. Status listings
    /// refresh this path; copy jobs write into it.
    #[serde(default)]
    pub address: String,
    /// Share id authorizing the operation; empty for the owning device's
    /// own requests.
    #[serde(default)]
    pub share: String,
    #[serde(rename = "type")]
    pub class: AgentClass,
}

/// A filesystem location one agent exposes to others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub execute: bool,
    /// Absolute path of the shared artifact.
    pub name: String,
    pub read_only: bool,
    #[serde(rename = "type")]
    pub kind: PathKind,
}

/// Listening ports of an agent's node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    pub http: u16,
    pub ws: u16,
}

/// IP addresses an agent answers on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressList {
    #[serde(rename = "IPv4")]
    pub ipv4: Vec<String>,
    #[serde(rename = "IPv6")]
    pub ipv6: Vec<String>,
}

/// Directory record for one known device or user agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub ip_all: AddressList,
    /// Address most recently confirmed reachable; empty until a first
    /// exchange succeeds.
    #[serde(default)]
    pub ip_selected: String,
    pub name: String,
    pub ports: Ports,
    #[serde(default)]
    pub shares: HashMap<String, Share>,
    pub status: ActivityStatus,
}

impl Agent {
    /// Preferred address for dialing this agent.
    pub fn address(&self) -> Option<&str> {
        if !self.ip_selected.is_empty() {
            return Some(self.ip_selected.as_str());
        }
        self.ip_all
            .ipv4
            .first()
            .or_else(|| self.ip_all.ipv6.first())
            .map(String::as_str)
    }
}
