//! Identity minting: `agent-hash` rebuilds the node's own identity,
//! `hash-share` derives stable identifiers for newly exposed paths.

use std::collections::HashMap;

use tracing::info;

use sharemesh_agents::{LocalIdentity, identity, local_addresses};
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::{
    AgentHashRequest, AgentHashResponse, HashShareRequest, HashShareResponse,
};
use sharemesh_protocol::types::{ActivityStatus, Agent, AgentClass};
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::Node;

/// Mints a fresh identity pair under the requested names and stores it.
///
/// The running node keeps serving under the identity it booted with;
/// the minted one takes over on the next launch. The fresh device is
/// seeded into the directory right away so settings written against it
/// survive the restart.
pub async fn agent_hash(
    node: &Node,
    request: AgentHashRequest,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    let minted = LocalIdentity::remint(&node.config.storage, &request.user, &request.device)?;
    node.directory.insert(
        AgentClass::Device,
        &minted.hash_device,
        Agent {
            ip_all: local_addresses(),
            ip_selected: String::new(),
            name: minted.name_device.clone(),
            ports: node.ports(),
            shares: HashMap::new(),
            status: ActivityStatus::Active,
        },
    )?;
    info!(device = %request.device, user = %request.user, "identity reminted");

    let response = AgentHashResponse {
        device: minted.hash_device,
        user: minted.hash_user,
    };
    let message = ServiceMessage::new(Service::AgentHash, &response)?;
    node.registry.broadcast(AgentClass::Browser, &message).await;
    transmit.respond(serde_json::to_string(&message)?).await?;
    Ok(())
}

/// Derives the share identifier for a path a browser is about to expose.
pub async fn hash_share(
    node: &Node,
    request: HashShareRequest,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    let hash = identity::mint_share(
        &node.identity.hash_user,
        &request.device,
        request.kind.as_str(),
        &request.share,
    );
    let response = HashShareResponse {
        device: request.device,
        hash,
        share: request.share,
        kind: request.kind,
    };
    let message = ServiceMessage::new(Service::HashShare, &response)?;
    transmit.respond(serde_json::to_string(&message)?).await?;
    Ok(())
}
