//! Pass-through services: chat messages between agents, browser log
//! lines, and the echo used by the browser test harness.

use tracing::{debug, info, warn};

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::messages::{MessageItem, TestBrowser};
use sharemesh_protocol::types::AgentClass;
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::Node;

/// Relays a batch of chat messages.
///
/// A batch addressed to a remote agent is forwarded whole; either way
/// the local browsers get a copy so the conversation view stays
/// current on both ends.
pub async fn message(
    node: &Node,
    items: Vec<MessageItem>,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    let envelope = ServiceMessage::new(Service::Message, &items)?;
    if let Some(first) = items.first()
        && !node.identity.matches(&first.agent_to)
    {
        match node.services.http_address(first.agent_type, &first.agent_to) {
            Ok(address) => {
                match node
                    .services
                    .client
                    .send(&address, first.agent_type, &envelope)
                    .await
                {
                    Ok(_) => {}
                    Err(error) if error.is_suppressible() => {
                        debug!(agent = %first.agent_to, "message not delivered: {error}")
                    }
                    Err(error) => warn!(agent = %first.agent_to, "message delivery failed: {error}"),
                }
            }
            Err(error) => warn!("message target unknown: {error}"),
        }
    }
    node.registry.broadcast(AgentClass::Browser, &envelope).await;
    transmit.respond(String::new()).await?;
    Ok(())
}

/// Re-emits browser console lines into the node's own log stream.
pub async fn log(
    _node: &Node,
    lines: Vec<serde_json::Value>,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    for line in &lines {
        match line {
            serde_json::Value::String(text) => info!(origin = "browser", "{text}"),
            other => info!(origin = "browser", "{other}"),
        }
    }
    transmit.respond(String::new()).await?;
    Ok(())
}

/// Echoes the harness payload straight back to the sender.
pub async fn test_browser(
    _node: &Node,
    payload: TestBrowser,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    let message = ServiceMessage::new(Service::TestBrowser, &payload)?;
    transmit.respond(serde_json::to_string(&message)?).await?;
    Ok(())
}
