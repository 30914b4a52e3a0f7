//! The four-step introduction that gets two nodes into each other's
//! directories.
//!
//! A browser starts with `invite-request` against its own node, which
//! forwards an `invite-ask` to the target address. The target's user
//! answers through `invite-answer`, and the accepting node sends
//! `invite-complete` back to where the request came from. Each side
//! inserts the other only on an accepted status.

use tracing::{debug, info, warn};

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::{Invite, InviteAction, InviteIdentity, InviteStatus};
use sharemesh_protocol::types::{ActivityStatus, Agent, AgentClass};
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::Node;

pub async fn apply(node: &Node, invite: Invite, transmit: &Transmit) -> Result<(), NodeError> {
    match invite.action {
        InviteAction::Request => request(node, invite, transmit).await,
        InviteAction::Ask => ask(node, invite, transmit).await,
        InviteAction::Answer => answer(node, invite, transmit).await,
        InviteAction::Complete => complete(node, invite, transmit).await,
    }
}

/// First step, from a local browser: stamp our identity into the
/// request block and carry the invitation to the target address.
async fn request(node: &Node, mut invite: Invite, transmit: &Transmit) -> Result<(), NodeError> {
    let address = match &invite.agent_response {
        Some(target) => reachable_address(target)?,
        None => return Err(NodeError::InviteUnreachable),
    };
    invite.agent_request = node.identity_block();
    invite.agent_response = None;
    invite.action = InviteAction::Ask;
    invite.status = InviteStatus::Invited;

    let message = ServiceMessage::new(Service::Invite, &invite)?;
    match node.services.client.send(&address, invite.class, &message).await {
        Ok(_) => {
            info!(%address, "invitation sent");
            transmit.respond(format!("Invitation sent to {address}.")).await?;
        }
        Err(error) if error.is_suppressible() => {
            debug!(%address, "invitation not answered: {error}");
            transmit
                .respond(format!("Invitation not answered at {address}."))
                .await?;
        }
        Err(error) => return Err(error.into()),
    }
    Ok(())
}

/// Second step, on the invited node: surface the request to the local
/// user and acknowledge delivery.
async fn ask(node: &Node, invite: Invite, transmit: &Transmit) -> Result<(), NodeError> {
    info!(
        user = %invite.agent_request.name_user,
        device = %invite.agent_request.name_device,
        "invitation received"
    );
    let message = ServiceMessage::new(Service::Invite, &invite)?;
    node.registry.broadcast(AgentClass::Browser, &message).await;
    transmit
        .respond(String::from("Invitation delivered to the local user."))
        .await?;
    Ok(())
}

/// Third step, from the invited node's browser: record the requester on
/// acceptance, stamp our identity into the response block and return
/// the verdict to where the request came from.
async fn answer(node: &Node, mut invite: Invite, transmit: &Transmit) -> Result<(), NodeError> {
    if invite.status == InviteStatus::Accepted {
        insert_peer(node, &invite.agent_request, invite.class)?;
    }
    let address = reachable_address(&invite.agent_request)?;
    invite.agent_response = Some(node.identity_block());
    invite.action = InviteAction::Complete;

    let message = ServiceMessage::new(Service::Invite, &invite)?;
    match node.services.client.send(&address, invite.class, &message).await {
        Ok(_) => {}
        Err(error) if error.is_suppressible() => {
            // The requester going away does not undo the local verdict.
            warn!(%address, "invitation verdict not delivered: {error}");
        }
        Err(error) => return Err(error.into()),
    }
    transmit
        .respond(format!("Invitation {} answer returned.", invite.status))
        .await?;
    Ok(())
}

/// Final step, back on the requesting node: record the new peer on
/// acceptance and show the outcome to the local user.
async fn complete(node: &Node, invite: Invite, transmit: &Transmit) -> Result<(), NodeError> {
    if invite.status == InviteStatus::Accepted
        && let Some(peer) = &invite.agent_response
    {
        insert_peer(node, peer, invite.class)?;
    }
    info!(status = %invite.status, "invitation completed");
    let message = ServiceMessage::new(Service::Invite, &invite)?;
    node.registry.broadcast(AgentClass::Browser, &message).await;
    transmit.respond(format!("Invitation {}.", invite.status)).await?;
    Ok(())
}

/// Stores the other side under the hash the relationship is keyed by.
fn insert_peer(node: &Node, peer: &InviteIdentity, class: AgentClass) -> Result<(), NodeError> {
    let (hash, name) = match class {
        AgentClass::User => (&peer.hash_user, &peer.name_user),
        _ => (&peer.hash_device, &peer.name_device),
    };
    node.directory.insert(
        class,
        hash,
        Agent {
            ip_all: peer.ip_all.clone(),
            ip_selected: peer.ip_selected.clone(),
            name: name.clone(),
            ports: peer.ports,
            shares: peer.shares.clone(),
            status: ActivityStatus::Active,
        },
    )?;
    Ok(())
}

/// Picks the address an invitation step travels to: the selected
/// address when one is pinned, otherwise the first interface listed.
fn reachable_address(peer: &InviteIdentity) -> Result<String, NodeError> {
    let ip = if !peer.ip_selected.is_empty() {
        peer.ip_selected.clone()
    } else if let Some(first) = peer.ip_all.ipv4.first() {
        first.clone()
    } else if let Some(first) = peer.ip_all.ipv6.first() {
        first.clone()
    } else {
        return Err(NodeError::InviteUnreachable);
    };
    Ok(format!("{ip}:{}", peer.ports.http))
}
