//! Presence exchanges: `agent-online` endpoint refresh and
//! `agent-status` heartbeat absorption.

use std::collections::HashMap;

use tracing::debug;

use sharemesh_agents::local_addresses;
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::{AgentOnline, StatusMessage};
use sharemesh_protocol::types::{ActivityStatus, Agent, AgentClass};
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::{LinkAddresses, Node};

/// Refreshes the caller's endpoint from what it sent plus the address
/// the exchange actually arrived from, then answers with this node's
/// own addresses and ports.
pub async fn agent_online(
    node: &Node,
    mut payload: AgentOnline,
    transmit: &Transmit,
    link: LinkAddresses,
) -> Result<(), NodeError> {
    let caller = Agent {
        ip_all: payload.ip_all.clone(),
        // The address we actually heard them on beats whatever they
        // believe about their own interfaces.
        ip_selected: link.remote.to_string(),
        name: String::new(),
        ports: payload.ports,
        shares: HashMap::new(),
        status: ActivityStatus::Active,
    };
    if !node
        .directory
        .set_endpoint(payload.agent_type, &payload.agent, &caller)?
    {
        debug!(agent = %payload.agent, "online check from an agent not in the directory");
    }

    payload.ip_all = local_addresses();
    payload.ip_selected = link.local.to_string();
    payload.ports = node.ports();
    let message = ServiceMessage::new(Service::AgentOnline, &payload)?;
    transmit.respond(serde_json::to_string(&message)?).await?;
    Ok(())
}

/// Absorbs a peer's heartbeat and echoes this node's own status back.
///
/// The reply is the echo the sender's beat window is waiting on, so it
/// carries a live reading from the activity monitor rather than a bare
/// acknowledgement.
pub async fn agent_status(
    node: &Node,
    status: StatusMessage,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    sharemesh_heartbeat::apply_status(&node.status, status).await?;

    let echo = StatusMessage {
        agent: node.identity.hash_device.clone(),
        agent_type: AgentClass::Device,
        broadcast: false,
        shares: node
            .directory
            .get(AgentClass::Device, &node.identity.hash_device)
            .map(|record| record.shares),
        status: node.monitor.status(),
    };
    let message = ServiceMessage::new(Service::AgentStatus, &echo)?;
    transmit.respond(serde_json::to_string(&message)?).await?;
    Ok(())
}
