//! Persists the documents the browser edits: configuration, device,
//! message and user settings each live in their own JSON file under
//! the storage directory.

use tracing::debug;

use sharemesh_protocol::messages::SettingsPayload;
use sharemesh_transport::Transmit;

use crate::NodeError;
use crate::node::Node;

/// Replaces the stored document named by the payload's kind.
///
/// The body is written as the browser sent it; the node treats the
/// document as opaque.
pub async fn apply(
    node: &Node,
    payload: SettingsPayload,
    transmit: &Transmit,
) -> Result<(), NodeError> {
    let path = node
        .config
        .storage
        .join(format!("{}.json", payload.kind.as_str()));
    std::fs::write(&path, payload.settings.get()).map_err(|source| NodeError::Settings {
        path: path.clone(),
        source,
    })?;
    debug!(kind = payload.kind.as_str(), "settings stored");
    transmit.respond(String::new()).await?;
    Ok(())
}
