//! Decides where a request executes: on this device, on whichever
//! device carries an addressed user session, or on a remote agent.
//!
//! Replies from remote execution are re-wrapped in the shape the
//! original caller expects, and status-bearing replies are repeated to
//! local listeners so views refresh on the requesting side too.

use tracing::{debug, info, warn};

use sharemesh_agents::identity;
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::format;
use sharemesh_protocol::messages::{
    CopyFileRequest, CopyManifest, CopyMessage, CopyRequest, DirectoryResult, FileAction,
    FileRequest, FileStatus, FsDetails, StringItem,
};
use sharemesh_protocol::types::{AgentClass, AgentRef};
use sharemesh_transport::Transmit;

use crate::{ServiceContext, ServiceError, copy, local};

// ---- entry points ----

/// Entry point for `file-system` envelopes.
pub async fn route_file(ctx: &ServiceContext, request: &FileRequest, transmit: &Transmit) {
    if let Err(error) = file_route(ctx, request, transmit).await {
        respond_error(transmit, error).await;
    }
}

/// Entry point for `copy` and `copy-list` envelopes.
pub async fn route_copy(ctx: &ServiceContext, message: CopyMessage, transmit: &Transmit) {
    let outcome = match message {
        CopyMessage::Copy(request) => copy_route(ctx, request, transmit).await,
        CopyMessage::CopyFile(request) => copy_file_route(ctx, request, transmit).await,
        CopyMessage::CopyRequestFiles(manifest) => manifest_route(ctx, manifest, transmit).await,
    };
    if let Err(error) = outcome {
        respond_error(transmit, error).await;
    }
}

/// Failures answer the caller in prose; the transport maps the known
/// phrases onto HTTP statuses.
async fn respond_error(transmit: &Transmit, error: ServiceError) {
    warn!("file service error: {error}");
    if let Err(send_error) = transmit.respond(error.to_string()).await {
        debug!("error reply not delivered: {send_error}");
    }
}

// ---- file-system routing ----

async fn file_route(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    // fs-execute always runs where the request lands; remote artifacts
    // are opened by the device that owns them, never shipped.
    if request.agent.id == ctx.identity.hash_device
        || request.action == FileAction::FsExecute
        || ctx.service_test
    {
        return local::menu(ctx, request, transmit).await;
    }
    if request.agent.id == ctx.identity.hash_user {
        let device = session_device(ctx, &request.agent).ok_or(ServiceError::UnexpectedUser)?;
        if device == ctx.identity.hash_device {
            return local::menu(ctx, request, transmit).await;
        }
        return forward_file(ctx, request, AgentClass::Device, &device, transmit).await;
    }
    forward_file(ctx, request, request.agent.class, &request.agent.id, transmit).await
}

/// Which device holds the session a user-addressed request belongs to.
///
/// An empty share pins it to this device; otherwise the named share's
/// owner is looked up among known devices.
fn session_device(ctx: &ServiceContext, agent: &AgentRef) -> Option<String> {
    if agent.share.is_empty() {
        return Some(ctx.identity.hash_device.clone());
    }
    ctx.directory
        .find_share(&agent.share)
        .map(|(device, _)| device)
}

async fn forward_file(
    ctx: &ServiceContext,
    request: &FileRequest,
    class: AgentClass,
    agent: &str,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let address = ctx.http_address(class, agent)?;
    let message = ServiceMessage::new(Service::FileSystem, request)?;
    debug!(action = %request.action, %class, agent, "forwarding file operation");
    let reply = ctx.client.send(&address, class, &message).await?;
    deliver_reply(ctx, request, reply, transmit).await
}

/// Re-wraps a remote reply for the original caller. A reply that does
/// not parse as the expected shape is the remote's failure text and
/// passes through verbatim.
async fn deliver_reply(
    ctx: &ServiceContext,
    request: &FileRequest,
    reply: String,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    match request.action {
        FileAction::FsBase64 | FileAction::FsHash | FileAction::FsRead => {
            match serde_json::from_str::<Vec<StringItem>>(&reply) {
                Ok(items) => transmit.respond(serde_json::to_string(&items)?).await?,
                Err(_) => transmit.respond(reply).await?,
            }
        }
        FileAction::FsDetails => match serde_json::from_str::<FsDetails>(&reply) {
            Ok(details) => transmit.respond(serde_json::to_string(&details)?).await?,
            Err(_) => transmit.respond(reply).await?,
        },
        _ => match serde_json::from_str::<FileStatus>(&reply) {
            Ok(status) => {
                transmit.respond(serde_json::to_string(&status)?).await?;
                if broadcasts_status(request) {
                    local::status_broadcast(ctx, &request.agent, status).await;
                }
            }
            Err(_) => transmit.respond(reply).await?,
        },
    }
    Ok(())
}

/// Navigation listings and searches serve one requesting view; every
/// other status-producing action refreshes all interested parties.
pub(crate) fn broadcasts_status(request: &FileRequest) -> bool {
    match request.action {
        FileAction::FsSearch => false,
        FileAction::FsDirectory => {
            !(request.name == "expand"
                || request.name == "navigate"
                || request.name.starts_with("loadPage:"))
        }
        _ => true,
    }
}

// ---- copy routing ----

async fn copy_route(
    ctx: &ServiceContext,
    mut request: CopyRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    if request.agent_source.id == ctx.identity.hash_device || ctx.service_test {
        if request.agent_source.id == request.agent_write.id {
            return copy::same_agent(ctx, request, transmit).await;
        }
        return copy::request_list(ctx, request, transmit).await;
    }
    if request.agent_source.id == ctx.identity.hash_user {
        let source_device =
            session_device(ctx, &request.agent_source).ok_or(ServiceError::UnexpectedUser)?;
        let write_device = if request.agent_write.id == ctx.identity.hash_user {
            session_device(ctx, &request.agent_write)
        } else {
            None
        };
        if source_device == ctx.identity.hash_device {
            if write_device.as_deref() == Some(source_device.as_str()) {
                return copy::same_agent(ctx, request, transmit).await;
            }
            return copy::request_list(ctx, request, transmit).await;
        }
        return forward_copy(ctx, request, AgentClass::Device, &source_device, transmit).await;
    }
    if request.agent_source.class == AgentClass::User
        && request.agent_write.class == AgentClass::Device
    {
        // A foreign user pulling toward one of our devices: grant the
        // source a one-off token so its status pushes at the write
        // side clear authorization.
        request.agent_write.share =
            identity::mint_copy_token(&ctx.identity.hash_user, &ctx.identity.hash_device);
    }
    let class = request.agent_source.class;
    let agent = request.agent_source.id.clone();
    forward_copy(ctx, request, class, &agent, transmit).await
}

/// Forwards a copy initiation; the reply is the job's final status,
/// repeated locally against the source locations.
async fn forward_copy(
    ctx: &ServiceContext,
    request: CopyRequest,
    class: AgentClass,
    agent: &str,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let address = ctx.http_address(class, agent)?;
    let source = request.agent_source.clone();
    let message = ServiceMessage::new(Service::Copy, &CopyMessage::Copy(request))?;
    info!(%class, agent, "forwarding copy initiation");
    let reply = ctx.client.send(&address, class, &message).await?;
    match serde_json::from_str::<FileStatus>(&reply) {
        Ok(status) => {
            transmit.respond(serde_json::to_string(&status)?).await?;
            local::status_broadcast(ctx, &source, status).await;
        }
        Err(_) => transmit.respond(reply).await?,
    }
    Ok(())
}

async fn copy_file_route(
    ctx: &ServiceContext,
    request: CopyFileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    if request.agent.id == ctx.identity.hash_device {
        return copy::send_file(request, transmit).await;
    }
    if request.agent.id == ctx.identity.hash_user {
        let device = session_device(ctx, &request.agent).ok_or(ServiceError::UnexpectedUser)?;
        if device == ctx.identity.hash_device {
            return copy::send_file(request, transmit).await;
        }
        return proxy_file(ctx, request, AgentClass::Device, &device, transmit).await;
    }
    let class = request.agent.class;
    let agent = request.agent.id.clone();
    proxy_file(ctx, request, class, &agent, transmit).await
}

/// Relays a file pull to the device that owns the bytes, passing the
/// payload and its transfer headers through without re-encoding.
async fn proxy_file(
    ctx: &ServiceContext,
    request: CopyFileRequest,
    class: AgentClass,
    agent: &str,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let address = ctx.http_address(class, agent)?;
    let message = ServiceMessage::new(Service::Copy, &CopyMessage::CopyFile(request))?;
    let payload = ctx.client.fetch_file(&address, class, &message).await?;
    let compressed = payload.compressed;
    let cut_path = payload.cut_path.clone();
    let file_name = payload.file_name.clone();
    let file_size = payload.file_size;
    let hash = payload.hash.clone();
    let response = copy::file_response(
        compressed,
        &cut_path,
        &file_name,
        file_size,
        &hash,
        payload.into_wire_bytes(),
    )?;
    transmit.respond_raw(response)?;
    Ok(())
}

async fn manifest_route(
    ctx: &ServiceContext,
    manifest: CopyManifest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    if ctx.service_test {
        // The harness never moves real bytes; answer the sender with a
        // plausible finished status so the exchange completes.
        let status = FileStatus {
            address: manifest.agent_write.address.clone(),
            agent: manifest.agent_write.id.clone(),
            agent_type: manifest.agent_write.class,
            failures: 0,
            file_list: Some(DirectoryResult::Entries(Vec::new())),
            message: format::copy_status(1, 10, 10, 0),
        };
        transmit.respond(serde_json::to_string(&status)?).await?;
        return Ok(());
    }
    if manifest.agent_write.id == ctx.identity.hash_device {
        return copy::request_files(ctx, manifest, transmit).await;
    }
    if manifest.agent_write.id == ctx.identity.hash_user {
        let device =
            session_device(ctx, &manifest.agent_write).ok_or(ServiceError::UnexpectedUser)?;
        if device == ctx.identity.hash_device {
            return copy::request_files(ctx, manifest, transmit).await;
        }
        return forward_manifest(ctx, manifest, AgentClass::Device, &device, transmit).await;
    }
    let class = manifest.agent_write.class;
    let agent = manifest.agent_write.id.clone();
    forward_manifest(ctx, manifest, class, &agent, transmit).await
}

/// Hands a manifest on toward the write side. The eventual reply is
/// already the final status; it passes through untouched.
async fn forward_manifest(
    ctx: &ServiceContext,
    manifest: CopyManifest,
    class: AgentClass,
    agent: &str,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let address = ctx.http_address(class, agent)?;
    let message = ServiceMessage::new(Service::CopyList, &CopyMessage::CopyRequestFiles(manifest))?;
    let reply = ctx.client.send(&address, class, &message).await?;
    transmit.respond(reply).await?;
    Ok(())
}
