//! Local execution of file-system requests.
//!
//! Every handler answers with either a status payload or, for the
//! string operations, a list of content items. Mutations additionally
//! repeat their status to browsers and peer devices so open views
//! refresh without polling.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use sharemesh_file_ops as file_ops;
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::Service;
use sharemesh_protocol::format;
use sharemesh_protocol::messages::{
    DirectoryEntry, DirectoryMarker, DirectoryResult, FileAction, FileRequest, FileStatus,
    FsDetails, StringItem,
};
use sharemesh_protocol::types::{AgentClass, AgentRef, PathKind, Share};
use sharemesh_transport::Transmit;

use crate::{ServiceContext, ServiceError, route};

// ---- dispatch ----

/// Executes one file-system request on this device and answers the
/// caller.
pub async fn menu(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    if let Some(marker) = share_bounds(ctx, request) {
        return refuse(request, marker, transmit).await;
    }
    match request.action {
        FileAction::FsBase64 | FileAction::FsHash | FileAction::FsRead => {
            strings(request, transmit).await
        }
        FileAction::FsClose => close_watch(ctx, request, transmit).await,
        FileAction::FsDestroy => destroy(ctx, request, transmit).await,
        FileAction::FsDetails => details(request, transmit).await,
        FileAction::FsDirectory => directory_listing(ctx, request, transmit).await,
        FileAction::FsExecute => execute(ctx, request, transmit).await,
        FileAction::FsNew => new_artifact(ctx, request, transmit).await,
        FileAction::FsRename => rename(ctx, request, transmit).await,
        FileAction::FsSearch => search(request, transmit).await,
        FileAction::FsWrite => write(ctx, request, transmit).await,
        FileAction::FsCopy | FileAction::FsCut => {
            // Copy and cut travel the dedicated copy service; a file
            // envelope naming them is a stale caller.
            transmit
                .respond(format!(
                    "Action {} is served by the copy service.",
                    request.action
                ))
                .await?;
            Ok(())
        }
    }
}

// ---- share authorization ----

/// Checks a request against the local share table.
///
/// Device peers of the same user see the whole filesystem. A foreign
/// user only reaches paths under the share its request names, a
/// read-only share refuses mutation, and execution needs the share's
/// execute grant.
fn share_bounds(ctx: &ServiceContext, request: &FileRequest) -> Option<DirectoryMarker> {
    if request.agent.class != AgentClass::User {
        return None;
    }
    let Some(share) = local_share(ctx, &request.agent.share) else {
        return Some(DirectoryMarker::NoShare);
    };
    let bounded = request
        .location
        .iter()
        .all(|location| Path::new(plain_path(request, location)).starts_with(&share.name));
    if !bounded {
        return Some(DirectoryMarker::NoShare);
    }
    if share.read_only && mutates(request.action) {
        return Some(DirectoryMarker::ReadOnly);
    }
    if request.action == FileAction::FsExecute && !share.execute {
        return Some(DirectoryMarker::ReadOnly);
    }
    None
}

fn mutates(action: FileAction) -> bool {
    matches!(
        action,
        FileAction::FsDestroy | FileAction::FsNew | FileAction::FsRename | FileAction::FsWrite
    )
}

/// Looks a share id up among this device's own published shares.
fn local_share(ctx: &ServiceContext, share: &str) -> Option<Share> {
    if share.is_empty() {
        return None;
    }
    let device = ctx
        .directory
        .get(AgentClass::Device, &ctx.identity.hash_device)?;
    device.shares.get(share).cloned()
}

/// The filesystem half of a location, with any `modalId:` prefix the
/// string operations carry stripped off.
fn plain_path<'a>(request: &FileRequest, location: &'a str) -> &'a str {
    match request.action {
        FileAction::FsBase64 | FileAction::FsHash | FileAction::FsRead => {
            match location.split_once(':') {
                Some((_, path)) => path,
                None => location,
            }
        }
        _ => location,
    }
}

/// Answers a request whose share authorization failed.
async fn refuse(
    request: &FileRequest,
    marker: DirectoryMarker,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    warn!(
        agent = %request.agent.id,
        action = %request.action,
        "refused by share bounds: {marker:?}"
    );
    match request.action {
        FileAction::FsDetails => {
            let details = FsDetails {
                dirs: DirectoryResult::Marker(marker),
                id: request.id.clone(),
            };
            transmit.respond(serde_json::to_string(&details)?).await?;
        }
        FileAction::FsBase64 | FileAction::FsHash | FileAction::FsRead => {
            // The string payload has no marker slot; answer in prose.
            transmit.respond(refusal_text(request, marker)).await?;
        }
        _ => {
            let status = FileStatus {
                address: request.agent.address.clone(),
                agent: request.agent.id.clone(),
                agent_type: request.agent.class,
                failures: 0,
                file_list: Some(DirectoryResult::Marker(marker)),
                message: refusal_text(request, marker),
            };
            transmit.respond(serde_json::to_string(&status)?).await?;
        }
    }
    Ok(())
}

fn refusal_text(request: &FileRequest, marker: DirectoryMarker) -> String {
    let location = request
        .location
        .first()
        .map(String::as_str)
        .unwrap_or_default();
    match marker {
        DirectoryMarker::Missing => format!("not found: {location}"),
        DirectoryMarker::NoShare => {
            format!("forbidden: {location} is not within a shared location")
        }
        DirectoryMarker::ReadOnly => {
            format!("forbidden: the share covering {location} forbids this action")
        }
    }
}

// ---- handlers ----

/// fs-base64, fs-hash and fs-read: one content item per location.
/// Locations may carry a `modalId:` prefix naming the requesting view;
/// per-item failures travel in the content slot.
async fn strings(request: &FileRequest, transmit: &Transmit) -> Result<(), ServiceError> {
    let action = request.action;
    let fallback = request.id.clone();
    let locations = request.location.clone();
    let items = tokio::task::spawn_blocking(move || {
        let mut items = Vec::with_capacity(locations.len());
        for location in &locations {
            let (id, path) = match location.split_once(':') {
                Some((id, path)) => (id, path),
                None => (fallback.as_str(), location.as_str()),
            };
            let content = match action {
                FileAction::FsBase64 => file_ops::read_base64(Path::new(path)),
                FileAction::FsHash => file_ops::hash_file(Path::new(path)),
                _ => file_ops::read_text(Path::new(path)),
            };
            items.push(StringItem {
                content: content.unwrap_or_else(|error| error.to_string()),
                id: id.to_string(),
                path: path.to_string(),
            });
        }
        items
    })
    .await?;
    transmit.respond(serde_json::to_string(&items)?).await?;
    Ok(())
}

/// fs-details: unbounded enumeration for size and count totals.
/// Listings concatenate across locations; a target that cannot be
/// enumerated at all reports the missing marker.
async fn details(request: &FileRequest, transmit: &Transmit) -> Result<(), ServiceError> {
    let locations = request.location.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let mut entries: Vec<DirectoryEntry> = Vec::new();
        for location in &locations {
            match file_ops::details(Path::new(location)) {
                Ok(mut listed) => {
                    let offset = entries.len();
                    for entry in &mut listed {
                        entry.parent += offset;
                    }
                    entries.append(&mut listed);
                }
                Err(error) => debug!(location, "details failed: {error}"),
            }
        }
        entries
    })
    .await?;
    let dirs = if entries.is_empty() {
        DirectoryResult::Marker(DirectoryMarker::Missing)
    } else {
        DirectoryResult::Entries(entries)
    };
    let details = FsDetails {
        dirs,
        id: request.id.clone(),
    };
    transmit.respond(serde_json::to_string(&details)?).await?;
    Ok(())
}

/// fs-directory: depth-limited listing of each location, and the point
/// where a view's watch follows its navigation.
async fn directory_listing(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    if let Some(previous) = &request.watch {
        ctx.watches.replace(previous, &location);
    }
    let depth = request.depth;
    let mut entries: Vec<DirectoryEntry> = Vec::new();
    for target in &request.location {
        let path = PathBuf::from(target.as_str());
        match tokio::task::spawn_blocking(move || file_ops::list(&path, depth)).await? {
            Ok(mut listed) => {
                let offset = entries.len();
                for entry in &mut listed {
                    entry.parent += offset;
                }
                entries.append(&mut listed);
            }
            Err(error) => debug!(%target, "listing failed: {error}"),
        }
    }
    let message = listing_message(&entries);
    let file_list = if entries.is_empty() {
        DirectoryResult::Marker(DirectoryMarker::Missing)
    } else {
        DirectoryResult::Entries(entries)
    };
    let status = FileStatus {
        address: location,
        agent: request.agent.id.clone(),
        agent_type: request.agent.class,
        failures: 0,
        file_list: Some(file_list),
        message,
    };
    transmit.respond(serde_json::to_string(&status)?).await?;
    if route::broadcasts_status(request) {
        status_broadcast(ctx, &request.agent, status).await;
    }
    Ok(())
}

/// fs-search: whole-tree fragment match under the first location.
/// Results serve the requesting view only.
async fn search(request: &FileRequest, transmit: &Transmit) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    let fragment = request.name.clone();
    let root = PathBuf::from(&location);
    let matches =
        tokio::task::spawn_blocking(move || file_ops::search(&root, &fragment)).await??;
    let status = FileStatus {
        address: location.clone(),
        agent: request.agent.id.clone(),
        agent_type: request.agent.class,
        failures: 0,
        message: format::search_status(&request.name, matches.len() as u64, &location),
        file_list: Some(DirectoryResult::Entries(matches)),
    };
    transmit.respond(serde_json::to_string(&status)?).await?;
    Ok(())
}

/// fs-new: create a file or directory; `name` picks which.
async fn new_artifact(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    let kind = if request.name == "directory" {
        PathKind::Directory
    } else {
        PathKind::File
    };
    let path = PathBuf::from(&location);
    tokio::task::spawn_blocking(move || file_ops::create(&path, kind)).await??;
    let message = format!("{location} created.");
    answer_with_status(ctx, request, parent_of(&location), message, 0, transmit).await
}

/// fs-write: overwrite the file at the location with `name`.
async fn write(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    let content = request.name.clone();
    let path = PathBuf::from(&location);
    tokio::task::spawn_blocking(move || file_ops::write_text(&path, &content)).await??;
    let message = if request.agent.id == ctx.identity.hash_device {
        format!("File {location} saved to disk on local device.")
    } else {
        format!(
            "File {location} saved to disk on device {}.",
            request.agent.id
        )
    };
    answer_with_status(ctx, request, parent_of(&location), message, 0, transmit).await
}

/// fs-rename: new basename within the same parent.
async fn rename(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    let name = request.name.clone();
    let path = PathBuf::from(&location);
    let renamed = tokio::task::spawn_blocking(move || file_ops::rename(&path, &name)).await??;
    let message = format!(
        "Path {location} on device {} renamed to {}.",
        request.agent.id,
        renamed.display()
    );
    answer_with_status(ctx, request, parent_of(&location), message, 0, transmit).await
}

/// fs-destroy: remove every location, releasing any watches on them
/// first. Individual removal failures are counted, not fatal.
async fn destroy(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    for location in &request.location {
        ctx.watches.close(location);
    }
    let targets = request.location.clone();
    let outcome = tokio::task::spawn_blocking(move || file_ops::destroy(&targets)).await?;
    let message = format!(
        "Path(s) {} destroyed on device {}.",
        request.location.join(", "),
        request.agent.id
    );
    let address = if request.agent.address.is_empty() {
        parent_of(request.location.first().map(String::as_str).unwrap_or(""))
    } else {
        request.agent.address.clone()
    };
    answer_with_status(ctx, request, address, message, outcome.failures, transmit).await
}

/// fs-close: a view went away; release its watch.
async fn close_watch(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    ctx.watches.close(&location);
    let message = format!("Watcher {location} closed.");
    answer_with_status(ctx, request, location, message, 0, transmit).await
}

/// fs-execute: open the artifact with the platform handler. Nothing on
/// disk changes, so no listing travels and nothing is broadcast.
async fn execute(
    ctx: &ServiceContext,
    request: &FileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let location = first_location(request)?;
    let path = PathBuf::from(&location);
    tokio::task::spawn_blocking(move || file_ops::open_path(&path)).await??;
    let status = FileStatus {
        address: request.agent.address.clone(),
        agent: request.agent.id.clone(),
        agent_type: request.agent.class,
        failures: 0,
        file_list: None,
        message: format!("Path {location} opened on device {}.", ctx.identity.hash_device),
    };
    transmit.respond(serde_json::to_string(&status)?).await?;
    Ok(())
}

// ---- status plumbing ----

fn first_location(request: &FileRequest) -> Result<String, ServiceError> {
    request
        .location
        .first()
        .cloned()
        .ok_or_else(|| sharemesh_file_ops::FileOpsError::NotFound("no location given".into()).into())
}

fn parent_of(location: &str) -> String {
    Path::new(location)
        .parent()
        .map(|parent| parent.display().to_string())
        .unwrap_or_else(|| location.to_string())
}

/// Builds the status for a completed mutation, answers the caller and
/// repeats it to every interested party.
async fn answer_with_status(
    ctx: &ServiceContext,
    request: &FileRequest,
    address: String,
    message: String,
    failures: u64,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let file_list = refresh_listing(&address).await;
    let status = FileStatus {
        address,
        agent: request.agent.id.clone(),
        agent_type: request.agent.class,
        failures,
        file_list,
        message,
    };
    transmit.respond(serde_json::to_string(&status)?).await?;
    status_broadcast(ctx, &request.agent, status).await;
    Ok(())
}

/// Depth-2 refresh of the directory a status pertains to. A listing
/// failure downgrades to the missing marker rather than failing an
/// operation that already succeeded.
pub(crate) async fn refresh_listing(address: &str) -> Option<DirectoryResult> {
    if address.is_empty() {
        return None;
    }
    let path = PathBuf::from(address);
    match tokio::task::spawn_blocking(move || file_ops::list(&path, 2)).await {
        Ok(Ok(entries)) => Some(DirectoryResult::Entries(entries)),
        Ok(Err(_)) => Some(DirectoryResult::Marker(DirectoryMarker::Missing)),
        Err(error) => {
            debug!("listing task failed: {error}");
            None
        }
    }
}

/// Summary line for a listing, counted by kind.
pub(crate) fn listing_message(entries: &[DirectoryEntry]) -> String {
    let mut directories = 0u64;
    let mut files = 0u64;
    let mut links = 0u64;
    let mut errors = 0u64;
    for entry in entries {
        match entry.kind {
            PathKind::Directory => directories += 1,
            PathKind::File => files += 1,
            PathKind::Link => links += 1,
            PathKind::Error => errors += 1,
        }
    }
    format::directory_status(directories, files, links, errors)
}

/// Repeats a status to everyone with a view on it: the owning user
/// when the request came from one, this node's browsers, and every
/// sibling device.
///
/// Remote copies are relabeled as this device before they travel, so
/// receivers attribute the change to the device that made it.
pub(crate) async fn status_broadcast(ctx: &ServiceContext, agent: &AgentRef, mut status: FileStatus) {
    if agent.class == AgentClass::User && agent.id != ctx.identity.hash_user {
        send_status(ctx, AgentClass::User, &agent.id, &status).await;
    }
    status.agent = ctx.identity.hash_device.clone();
    status.agent_type = AgentClass::Device;
    match ServiceMessage::new(Service::FileSystemStatus, &status) {
        Ok(message) => ctx.registry.broadcast(AgentClass::Browser, &message).await,
        Err(error) => debug!("status encode failed: {error}"),
    }
    for device in ctx.directory.hashes(AgentClass::Device) {
        if device == ctx.identity.hash_device {
            continue;
        }
        send_status(ctx, AgentClass::Device, &device, &status).await;
    }
}

/// One leg of a status fan-out. Unreachable or sleeping peers miss the
/// refresh; that is not worth more than a log line.
pub(crate) async fn send_status(
    ctx: &ServiceContext,
    class: AgentClass,
    agent: &str,
    status: &FileStatus,
) {
    let Ok(address) = ctx.http_address(class, agent) else {
        return;
    };
    let message = match ServiceMessage::new(Service::FileSystemStatus, status) {
        Ok(message) => message,
        Err(error) => {
            debug!("status encode failed: {error}");
            return;
        }
    };
    if let Err(error) = ctx.client.send(&address, class, &message).await {
        if error.is_suppressible() {
            debug!(%class, agent, "status delivery skipped: {error}");
        } else {
            warn!(%class, agent, "status delivery failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use http_body_util::BodyExt;
    use sharemesh_agents::{AgentDirectory, LocalIdentity};
    use sharemesh_protocol::types::{ActivityStatus, AddressList, Agent, Ports};
    use sharemesh_websocket::SocketRegistry;

    fn context(state: &Path) -> ServiceContext {
        let identity = LocalIdentity::load_or_mint(state, "alice", "laptop").unwrap();
        let directory = Arc::new(AgentDirectory::open(state).unwrap());
        ServiceContext::new(
            identity,
            directory,
            Arc::new(SocketRegistry::new()),
            0,
            false,
        )
        .unwrap()
    }

    fn request(ctx: &ServiceContext, action: FileAction, location: Vec<String>) -> FileRequest {
        FileRequest {
            action,
            agent: AgentRef {
                id: ctx.identity.hash_device.clone(),
                address: String::new(),
                share: String::new(),
                class: AgentClass::Device,
            },
            depth: 2,
            id: "test-modal".into(),
            location,
            name: String::new(),
            watch: None,
        }
    }

    async fn body_of(
        receiver: tokio::sync::oneshot::Receiver<
            hyper::Response<http_body_util::Full<bytes::Bytes>>,
        >,
    ) -> (hyper::StatusCode, String) {
        let response = receiver.await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn fs_new_creates_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let target = tmp.path().join("made.txt");
        let mut req = request(
            &ctx,
            FileAction::FsNew,
            vec![target.display().to_string()],
        );
        req.name = "file".into();

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (code, body) = body_of(receiver).await;
        assert_eq!(code, hyper::StatusCode::OK);
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(status.message, format!("{} created.", target.display()));
        assert!(matches!(
            status.file_list,
            Some(DirectoryResult::Entries(_))
        ));
        assert!(target.is_file());
    }

    #[tokio::test]
    async fn fs_new_directory_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let target = tmp.path().join("made-dir");
        let mut req = request(&ctx, FileAction::FsNew, vec![target.display().to_string()]);
        req.name = "directory".into();

        let (transmit, _receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn fs_write_local_device_wording() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let target = tmp.path().join("note.txt");
        let mut req = request(&ctx, FileAction::FsWrite, vec![target.display().to_string()]);
        req.name = "hello".into();

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(
            status.message,
            format!("File {} saved to disk on local device.", target.display())
        );
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[tokio::test]
    async fn fs_write_names_remote_devices() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let target = tmp.path().join("note.txt");
        let mut req = request(&ctx, FileAction::FsWrite, vec![target.display().to_string()]);
        req.name = "hello".into();
        req.agent.id = "f".repeat(128);

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(
            status.message,
            format!(
                "File {} saved to disk on device {}.",
                target.display(),
                "f".repeat(128)
            )
        );
    }

    #[tokio::test]
    async fn fs_rename_reports_both_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let old = tmp.path().join("old.txt");
        std::fs::write(&old, "x").unwrap();
        let mut req = request(&ctx, FileAction::FsRename, vec![old.display().to_string()]);
        req.name = "new.txt".into();

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        let renamed = tmp.path().join("new.txt");
        assert_eq!(
            status.message,
            format!(
                "Path {} on device {} renamed to {}.",
                old.display(),
                ctx.identity.hash_device,
                renamed.display()
            )
        );
        assert!(renamed.exists());
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn fs_destroy_lists_every_target() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b");
        std::fs::write(&a, "x").unwrap();
        std::fs::create_dir(&b).unwrap();
        let req = request(
            &ctx,
            FileAction::FsDestroy,
            vec![a.display().to_string(), b.display().to_string()],
        );

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(
            status.message,
            format!(
                "Path(s) {}, {} destroyed on device {}.",
                a.display(),
                b.display(),
                ctx.identity.hash_device
            )
        );
        assert_eq!(status.failures, 0);
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn fs_read_parses_modal_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let file = tmp.path().join("doc.txt");
        std::fs::write(&file, "content here").unwrap();
        let req = request(
            &ctx,
            FileAction::FsRead,
            vec![format!("modal-7:{}", file.display())],
        );

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let items: Vec<StringItem> = serde_json::from_str(&body).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "modal-7");
        assert_eq!(items[0].path, file.display().to_string());
        assert_eq!(items[0].content, "content here");
    }

    #[tokio::test]
    async fn fs_hash_is_sha3_512_hex() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let file = tmp.path().join("doc.txt");
        std::fs::write(&file, "abc").unwrap();
        let req = request(
            &ctx,
            FileAction::FsHash,
            vec![format!("m:{}", file.display())],
        );

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let items: Vec<StringItem> = serde_json::from_str(&body).unwrap();
        assert_eq!(items[0].content.len(), 128);
        assert_eq!(items[0].content, file_ops::hash_bytes(b"abc"));
    }

    #[tokio::test]
    async fn fs_read_missing_reports_in_content() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let req = request(&ctx, FileAction::FsRead, vec!["m:/no/such/file".into()]);

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (code, body) = body_of(receiver).await;
        // The list itself is a success; the item carries the failure.
        assert_eq!(code, hyper::StatusCode::OK);
        let items: Vec<StringItem> = serde_json::from_str(&body).unwrap();
        assert_eq!(items[0].content, "not found: /no/such/file");
    }

    #[tokio::test]
    async fn fs_details_missing_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let req = request(&ctx, FileAction::FsDetails, vec!["/no/such/tree".into()]);

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        assert!(body.contains(r#""dirs":"missing""#));
        assert!(body.contains(r#""id":"test-modal""#));
    }

    #[tokio::test]
    async fn fs_details_totals_across_locations() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        std::fs::write(tmp.path().join("a.txt"), "12345").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "12").unwrap();
        let req = request(
            &ctx,
            FileAction::FsDetails,
            vec![
                tmp.path().join("a.txt").display().to_string(),
                tmp.path().join("b.txt").display().to_string(),
            ],
        );

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let details: FsDetails = serde_json::from_str(&body).unwrap();
        match details.dirs {
            DirectoryResult::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries.iter().map(|e| e.size).sum::<u64>(), 7);
            }
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fs_directory_lists_and_summarizes() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let base = tmp.path().join("view");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(base.join("one.txt"), "1").unwrap();
        std::fs::create_dir(base.join("sub")).unwrap();
        let req = request(&ctx, FileAction::FsDirectory, vec![base.display().to_string()]);

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(status.address, base.display().to_string());
        // root + sub as directories, one file
        assert_eq!(status.message, "2 directories, 1 file, 0 symbolic links, 0 errors");
    }

    #[tokio::test]
    async fn fs_directory_registers_a_watch() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let base = tmp.path().join("view");
        std::fs::create_dir(&base).unwrap();
        let mut req = request(&ctx, FileAction::FsDirectory, vec![base.display().to_string()]);
        req.watch = Some(String::new());

        let (transmit, _receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();
        assert!(ctx.watches.is_watched(&base.display().to_string()));
    }

    #[tokio::test]
    async fn fs_search_reports_fragment_and_count() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let base = tmp.path().join("tree");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(base.join("match-one.txt"), "").unwrap();
        std::fs::write(base.join("match-two.txt"), "").unwrap();
        std::fs::write(base.join("other.txt"), "").unwrap();
        let mut req = request(&ctx, FileAction::FsSearch, vec![base.display().to_string()]);
        req.name = "match".into();

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(
            status.message,
            format!(
                "Search fragment \"match\" returned 2 matches from {}.",
                base.display()
            )
        );
    }

    #[tokio::test]
    async fn fs_close_releases_the_watch() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let base = tmp.path().join("view");
        std::fs::create_dir(&base).unwrap();
        ctx.watches.watch(&base.display().to_string());

        let req = request(&ctx, FileAction::FsClose, vec![base.display().to_string()]);
        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(status.message, format!("Watcher {} closed.", base.display()));
        assert!(!ctx.watches.is_watched(&base.display().to_string()));
    }

    #[tokio::test]
    async fn fs_copy_is_directed_to_the_copy_service() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let req = request(&ctx, FileAction::FsCopy, vec!["/tmp/x".into()]);

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        assert_eq!(body, "Action fs-copy is served by the copy service.");
    }

    // ---- share bounds ----

    fn user_request(ctx: &ServiceContext, action: FileAction, location: &str) -> FileRequest {
        let mut req = request(ctx, action, vec![location.to_string()]);
        req.agent = AgentRef {
            id: "u".repeat(128),
            address: String::new(),
            share: "share-hash".into(),
            class: AgentClass::User,
        };
        req
    }

    fn publish_share(ctx: &ServiceContext, name: &str, read_only: bool) {
        let mut shares = HashMap::new();
        shares.insert(
            "share-hash".to_string(),
            Share {
                execute: false,
                name: name.to_string(),
                read_only,
                kind: PathKind::Directory,
            },
        );
        ctx.directory
            .insert(
                AgentClass::Device,
                &ctx.identity.hash_device,
                Agent {
                    ip_all: AddressList::default(),
                    ip_selected: String::new(),
                    name: "laptop".into(),
                    ports: Ports::default(),
                    shares,
                    status: ActivityStatus::Active,
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn unshared_location_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        publish_share(&ctx, &tmp.path().join("public").display().to_string(), false);

        let req = user_request(&ctx, FileAction::FsDirectory, "/etc");
        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (code, body) = body_of(receiver).await;
        assert_eq!(code, hyper::StatusCode::OK);
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert!(matches!(
            status.file_list,
            Some(DirectoryResult::Marker(DirectoryMarker::NoShare))
        ));
        assert!(status.message.starts_with("forbidden:"));
    }

    #[tokio::test]
    async fn unknown_share_id_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        // No shares published at all.
        let req = user_request(&ctx, FileAction::FsDirectory, "/anywhere");

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();
        let (_, body) = body_of(receiver).await;
        assert!(body.contains(r#""noShare""#));
    }

    #[tokio::test]
    async fn read_only_share_refuses_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let public = tmp.path().join("public");
        std::fs::create_dir(&public).unwrap();
        publish_share(&ctx, &public.display().to_string(), true);

        let target = public.join("newfile.txt");
        let mut req = user_request(&ctx, FileAction::FsNew, &target.display().to_string());
        req.name = "file".into();

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert!(matches!(
            status.file_list,
            Some(DirectoryResult::Marker(DirectoryMarker::ReadOnly))
        ));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn read_only_share_still_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let public = tmp.path().join("public");
        std::fs::create_dir(&public).unwrap();
        std::fs::write(public.join("seen.txt"), "x").unwrap();
        publish_share(&ctx, &public.display().to_string(), true);

        let req = user_request(&ctx, FileAction::FsDirectory, &public.display().to_string());
        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();

        let (_, body) = body_of(receiver).await;
        let status: FileStatus = serde_json::from_str(&body).unwrap();
        assert!(matches!(
            status.file_list,
            Some(DirectoryResult::Entries(_))
        ));
    }

    #[tokio::test]
    async fn fs_details_refusal_uses_the_dirs_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let req = user_request(&ctx, FileAction::FsDetails, "/anywhere");

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();
        let (_, body) = body_of(receiver).await;
        assert!(body.contains(r#""dirs":"noShare""#));
    }

    #[tokio::test]
    async fn string_refusal_is_a_403_in_prose() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path());
        let req = user_request(&ctx, FileAction::FsRead, "m:/anywhere");

        let (transmit, receiver) = Transmit::http();
        menu(&ctx, &req, &transmit).await.unwrap();
        let (code, body) = body_of(receiver).await;
        assert_eq!(code, hyper::StatusCode::FORBIDDEN);
        assert!(body.starts_with("forbidden:"));
    }
}
