//! Fans decoded envelopes out to their service handlers.
//!
//! Every envelope that survives decoding lands here, whatever channel
//! carried it. File and copy traffic is handed to the file service;
//! the remaining services are mesh concerns handled in this crate.

use tracing::{debug, warn};

use sharemesh_file_service::{route_copy, route_file};
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::FileRequest;
use sharemesh_protocol::types::AgentClass;
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::{LinkAddresses, Node};
use crate::services;

/// Entry point for every decoded envelope.
///
/// Failures answer the caller in prose, matching how the file service
/// reports its own errors.
pub async fn apply(node: &Node, envelope: ServiceMessage, transmit: &Transmit, link: LinkAddresses) {
    let service = envelope.service;
    if let Err(error) = route(node, envelope, transmit, link).await {
        warn!(%service, "service failed: {error}");
        if let Err(send_error) = transmit.respond(error.to_string()).await {
            debug!("error reply not delivered: {send_error}");
        }
    }
}

async fn route(
    node: &Node,
    envelope: ServiceMessage,
    transmit: &Transmit,
    link: LinkAddresses,
) -> Result<(), NodeError> {
    match envelope.service {
        Service::AgentHash => services::identity::agent_hash(node, envelope.parse()?, transmit).await,
        Service::AgentOnline => {
            services::presence::agent_online(node, envelope.parse()?, transmit, link).await
        }
        Service::AgentStatus => {
            services::presence::agent_status(node, envelope.parse()?, transmit).await
        }
        Service::Copy | Service::CopyList => {
            route_copy(&node.services, envelope.parse()?, transmit).await;
            Ok(())
        }
        Service::FileSystem => {
            let request: FileRequest = envelope.parse()?;
            route_file(&node.services, &request, transmit).await;
            Ok(())
        }
        Service::FileSystemDetails | Service::FileSystemStatus | Service::FileSystemString => {
            // View updates on their way to a UI; the node only relays.
            node.registry.broadcast(AgentClass::Browser, &envelope).await;
            transmit.respond(String::new()).await?;
            Ok(())
        }
        Service::HashShare => {
            services::identity::hash_share(node, envelope.parse()?, transmit).await
        }
        Service::Invite => services::invite::apply(node, envelope.parse()?, transmit).await,
        Service::Log => services::relay::log(node, envelope.parse()?, transmit).await,
        Service::Message => services::relay::message(node, envelope.parse()?, transmit).await,
        Service::Settings => services::settings::apply(node, envelope.parse()?, transmit).await,
        Service::TestBrowser => {
            services::relay::test_browser(node, envelope.parse()?, transmit).await
        }
    }
}
