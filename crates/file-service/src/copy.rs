//! The copy and cut engine.
//!
//! A job crosses two agents: the source enumerates the selection into
//! a manifest and serves the bytes; the write side walks the manifest
//! in order, pulls one file at a time and verifies every digest.
//! Status payloads fan out as the walk advances, and the reply to the
//! manifest delivery itself carries the final status back to the
//! source. A cut is a copy whose source removes its files once the
//! write side reports zero failures.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use tracing::{debug, info, warn};

use sharemesh_agents::identity;
use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::{
    HEADER_COMPRESSION, HEADER_CUT_PATH, HEADER_FILE_NAME, HEADER_FILE_SIZE, HEADER_HASH,
    HEADER_RESPONSE_TYPE, Service,
};
use sharemesh_protocol::format;
use sharemesh_protocol::messages::{
    CopyFileRequest, CopyManifest, CopyMessage, CopyRequest, FileStatus, ManifestEntry,
};
use sharemesh_protocol::types::{AgentClass, AgentRef, PathKind};
use sharemesh_transport::{Transmit, TransportError, compress};

use sharemesh_file_ops as file_ops;

use crate::{ServiceContext, ServiceError, local};

// ---- job accounting ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CopyTotals {
    directories: u64,
    file_count: u64,
    file_size: u64,
}

/// Running totals a copy job reports from.
struct JobStatus {
    agent_source: AgentRef,
    agent_write: AgentRef,
    count_file: u64,
    failures: u64,
    total_size: u64,
    written_size: u64,
}

impl JobStatus {
    fn new(source: &AgentRef, write: &AgentRef, total_size: u64) -> Self {
        Self {
            agent_source: source.clone(),
            agent_write: write.clone(),
            count_file: 0,
            failures: 0,
            total_size,
            written_size: 0,
        }
    }

    fn message(&self) -> String {
        format::copy_status(
            self.count_file,
            self.written_size,
            self.total_size,
            self.failures,
        )
    }
}

/// Builds the job's status against the write destination and fans it
/// out. When `transmit` is given the same payload also completes that
/// pending exchange, which is how the manifest sender learns the job
/// finished.
async fn push_status(
    ctx: &ServiceContext,
    job: &JobStatus,
    message: Option<String>,
    transmit: Option<&Transmit>,
) -> Result<(), ServiceError> {
    let status = FileStatus {
        address: job.agent_write.address.clone(),
        agent: job.agent_write.id.clone(),
        agent_type: job.agent_write.class,
        failures: job.failures,
        file_list: local::refresh_listing(&job.agent_write.address).await,
        message: message.unwrap_or_else(|| job.message()),
    };
    if let Some(transmit) = transmit {
        transmit.respond(serde_json::to_string(&status)?).await?;
    }
    local::status_broadcast(ctx, &job.agent_source, status).await;
    Ok(())
}

// ---- source side ----

/// Enumerates the source selection, ships the manifest to the write
/// agent and waits out the transfer; the reply to that delivery is the
/// job's final status. For a cut with zero failures the sources are
/// removed before the caller is answered.
pub(crate) async fn request_list(
    ctx: &ServiceContext,
    request: CopyRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let locations = request.location.clone();
    let (list, totals) =
        tokio::task::spawn_blocking(move || enumerate(&locations)).await??;

    announce_request(ctx, &request, totals.file_count).await;

    let manifest = authorize_manifest(
        ctx,
        CopyManifest {
            agent_source: request.agent_source.clone(),
            agent_write: request.agent_write.clone(),
            cut: request.cut,
            directories: totals.directories,
            file_count: totals.file_count,
            file_size: totals.file_size,
            id: uuid::Uuid::new_v4().to_string(),
            list: sort_manifest(list),
        },
    );

    let class = manifest.agent_write.class;
    let address = ctx.http_address(class, &manifest.agent_write.id)?;
    let message = ServiceMessage::new(Service::CopyList, &CopyMessage::CopyRequestFiles(manifest))?;
    info!(
        files = totals.file_count,
        bytes = totals.file_size,
        cut = request.cut,
        "copy manifest sent"
    );
    let reply = ctx.client.send(&address, class, &message).await?;

    let Ok(status) = serde_json::from_str::<FileStatus>(&reply) else {
        // The write side refused in prose; hand its text through.
        transmit.respond(reply).await?;
        return Ok(());
    };
    if request.cut && status.failures == 0 {
        let roots = request.location.clone();
        let outcome = tokio::task::spawn_blocking(move || file_ops::destroy(&roots)).await?;
        transmit.respond(serde_json::to_string(&status)?).await?;
        cut_status(ctx, &request, &totals, outcome.failures).await;
    } else {
        transmit.respond(serde_json::to_string(&status)?).await?;
    }
    Ok(())
}

/// Walks each selected location and flattens the trees into manifest
/// entries whose relative paths are anchored at the selection's
/// parent, so the destination keeps the selected name.
fn enumerate(locations: &[String]) -> Result<(Vec<ManifestEntry>, CopyTotals), ServiceError> {
    let mut list = Vec::new();
    let mut totals = CopyTotals::default();
    for location in locations {
        let root = Path::new(location);
        let base = root.parent().unwrap_or_else(|| Path::new(""));
        for entry in file_ops::list(root, 0)? {
            let relative = Path::new(&entry.path)
                .strip_prefix(base)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| entry.path.clone());
            let size = match entry.kind {
                PathKind::Error => continue,
                PathKind::Directory => {
                    totals.directories += 1;
                    0
                }
                PathKind::File | PathKind::Link => {
                    totals.file_count += 1;
                    totals.file_size += entry.size;
                    entry.size
                }
            };
            list.push(ManifestEntry {
                path: entry.path,
                kind: entry.kind,
                relative,
                size,
            });
        }
    }
    Ok((list, totals))
}

/// Directories land before files so targets exist when their contents
/// arrive; shallower directories come first, files sort by relative
/// path.
fn sort_manifest(mut list: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    list.sort_by(|a, b| {
        let a_dir = a.kind == PathKind::Directory;
        let b_dir = b.kind == PathKind::Directory;
        match (a_dir, b_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => a.relative.len().cmp(&b.relative.len()),
            (false, false) => a.relative.cmp(&b.relative),
        }
    });
    list
}

/// Jobs crossing a user boundary get a one-off token so the remote
/// side may pull files that live outside any published share. A
/// device-to-user job additionally travels under the user identity;
/// the peer never learns which device served it.
fn authorize_manifest(ctx: &ServiceContext, mut manifest: CopyManifest) -> CopyManifest {
    let user_leg = manifest.agent_source.class == AgentClass::User
        || manifest.agent_write.class == AgentClass::User;
    if !user_leg || manifest.agent_source.id == manifest.agent_write.id {
        return manifest;
    }
    let token = identity::mint_copy_token(&ctx.identity.hash_user, &ctx.identity.hash_device);
    if manifest.agent_source.class == AgentClass::Device
        && manifest.agent_write.class == AgentClass::User
    {
        manifest.agent_source = AgentRef {
            id: ctx.identity.hash_user.clone(),
            address: manifest.agent_source.address.clone(),
            share: token,
            class: AgentClass::User,
        };
    } else {
        manifest.agent_source.share = token;
    }
    manifest
}

/// Tells everyone a transfer is about to start, before any bytes move.
/// The announcement names the source's class and the write agent's
/// display name.
async fn announce_request(ctx: &ServiceContext, request: &CopyRequest, file_count: u64) {
    let Some(write_agent) = ctx
        .directory
        .get(request.agent_write.class, &request.agent_write.id)
    else {
        return;
    };
    let plural = if file_count == 1 { "" } else { "s" };
    let status = FileStatus {
        address: request.agent_write.address.clone(),
        agent: request.agent_write.id.clone(),
        agent_type: request.agent_write.class,
        failures: 0,
        file_list: None,
        message: format!(
            "Requesting {file_count} file{plural} for copy from {} {}.",
            request.agent_source.class, write_agent.name
        ),
    };
    local::status_broadcast(ctx, &request.agent_write, status).await;
}

/// Final report for a cut: refreshes the source view and names what
/// was destroyed.
async fn cut_status(
    ctx: &ServiceContext,
    request: &CopyRequest,
    totals: &CopyTotals,
    removal_failures: u64,
) {
    let address = request.agent_source.address.clone();
    let status = FileStatus {
        agent: request.agent_source.id.clone(),
        agent_type: request.agent_source.class,
        failures: removal_failures,
        file_list: local::refresh_listing(&address).await,
        message: format::cut_status(totals.directories, totals.file_count, removal_failures),
        address,
    };
    local::status_broadcast(ctx, &request.agent_source, status).await;
}

/// Answers a `copy-file` pull with the file bytes and their transfer
/// headers. The digest is computed before anything travels so the
/// write side can verify what it lands.
pub(crate) async fn send_file(
    request: CopyFileRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let path = PathBuf::from(&request.file_location);
    let (bytes, hash) = tokio::task::spawn_blocking(move || -> Result<_, ServiceError> {
        let hash = file_ops::hash_file(&path)?;
        let bytes = file_ops::read_bytes(&path)?;
        Ok((bytes, hash))
    })
    .await??;

    let size = bytes.len() as u64;
    let compressed = request.compression > 0;
    let body = if compressed {
        compress::compress(&bytes, request.compression).map_err(TransportError::from)?
    } else {
        bytes
    };
    debug!(
        file = %request.file_name,
        bytes = size,
        compressed,
        "serving file pull"
    );
    let response = file_response(
        compressed,
        &request.file_location,
        &request.file_name,
        size,
        &hash,
        body,
    )?;
    transmit.respond_raw(response)?;
    Ok(())
}

/// Response carrying one file's bytes plus the transfer headers.
pub(crate) fn file_response(
    compressed: bool,
    cut_path: &str,
    file_name: &str,
    file_size: u64,
    hash: &str,
    body: Vec<u8>,
) -> Result<Response<Full<Bytes>>, ServiceError> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/octet-stream")
        .header(HEADER_COMPRESSION, if compressed { "true" } else { "false" })
        .header(HEADER_CUT_PATH, cut_path)
        .header(HEADER_FILE_NAME, file_name)
        .header(HEADER_FILE_SIZE, file_size.to_string())
        .header(HEADER_HASH, hash)
        .header(HEADER_RESPONSE_TYPE, "copy-file")
        .body(Full::new(Bytes::from(body)))?)
}

// ---- write side ----

/// Walks a received manifest: creates directories, pulls files one at
/// a time with digest verification, and answers the manifest sender
/// with the final status once the walk finishes.
pub(crate) async fn request_files(
    ctx: &ServiceContext,
    manifest: CopyManifest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let mut job = JobStatus::new(&manifest.agent_source, &manifest.agent_write, manifest.file_size);
    let destination = PathBuf::from(&manifest.agent_write.address);
    let plural = if manifest.file_count == 1 { "" } else { "s" };
    push_status(
        ctx,
        &job,
        Some(format!(
            "Copy started for {} file{plural} at {} ({} bytes).",
            manifest.file_count,
            format::pretty_bytes(manifest.file_size),
            format::commas(manifest.file_size),
        )),
        None,
    )
    .await?;

    let total = manifest.list.len();
    for (index, entry) in manifest.list.iter().enumerate() {
        if entry.kind == PathKind::Directory {
            let target = destination.join(&entry.relative);
            let made =
                tokio::task::spawn_blocking(move || file_ops::create(&target, PathKind::Directory))
                    .await?;
            if let Err(error) = made {
                warn!(directory = %entry.relative, "create failed: {error}");
                job.failures += 1;
            }
        } else {
            pull_file(ctx, &manifest, entry, &mut job, &destination).await;
        }
        if index + 1 < total {
            push_status(ctx, &job, None, None).await?;
        }
    }

    job.written_size = job.total_size;
    info!(
        files = job.count_file,
        failures = job.failures,
        cut = manifest.cut,
        "copy job finished"
    );
    push_status(ctx, &job, None, Some(transmit)).await?;
    Ok(())
}

/// Pulls one manifest file from the source, writes it under the
/// destination and verifies its digest. A failure deletes the partial
/// artifact and counts; the walk continues.
async fn pull_file(
    ctx: &ServiceContext,
    manifest: &CopyManifest,
    entry: &ManifestEntry,
    job: &mut JobStatus,
    destination: &Path,
) {
    let target = destination.join(&entry.relative);
    let outcome = async {
        let address =
            ctx.http_address(manifest.agent_source.class, &manifest.agent_source.id)?;
        let request = CopyFileRequest {
            agent: manifest.agent_source.clone(),
            compression: ctx.compression,
            cut: manifest.cut,
            file_location: entry.path.clone(),
            file_name: entry.relative.clone(),
            id: manifest.id.clone(),
            size: entry.size,
        };
        let message = ServiceMessage::new(Service::Copy, &CopyMessage::CopyFile(request))?;
        let payload = ctx
            .client
            .fetch_file(&address, manifest.agent_source.class, &message)
            .await?;
        let expected = payload.hash.clone();
        let bytes = payload.into_bytes()?;
        let written = bytes.len() as u64;
        let target = target.clone();
        let digest = tokio::task::spawn_blocking(move || -> Result<String, ServiceError> {
            file_ops::write_bytes(&target, &bytes)?;
            Ok(file_ops::hash_file(&target)?)
        })
        .await??;
        if digest != expected {
            return Err(ServiceError::Integrity {
                file: entry.relative.clone(),
            });
        }
        Ok::<u64, ServiceError>(written)
    }
    .await;

    match outcome {
        Ok(written) => {
            job.count_file += 1;
            job.written_size += written;
        }
        Err(error) => {
            warn!(file = %entry.relative, "pull failed: {error}");
            job.failures += 1;
            // Never leave a partial or corrupt artifact behind.
            let _ = tokio::fs::remove_file(&target).await;
        }
    }
}

// ---- same-agent jobs ----

/// Source and destination are the same agent: a pure filesystem copy
/// with no network leg, under the same status contract.
pub(crate) async fn same_agent(
    ctx: &ServiceContext,
    request: CopyRequest,
    transmit: &Transmit,
) -> Result<(), ServiceError> {
    let sizes = request.location.clone();
    let total_size = tokio::task::spawn_blocking(move || selection_size(&sizes)).await?;
    let mut job = JobStatus::new(&request.agent_source, &request.agent_write, total_size);
    let destination = PathBuf::from(&request.agent_write.address);
    let mut copied_directories = 0u64;

    let last = request.location.len().saturating_sub(1);
    for (index, location) in request.location.iter().enumerate() {
        let source = PathBuf::from(location);
        let target = destination.clone();
        match tokio::task::spawn_blocking(move || file_ops::copy_path(&source, &target)).await? {
            Ok(outcome) => {
                job.count_file += outcome.files;
                job.written_size += outcome.bytes;
                copied_directories += outcome.directories;
            }
            Err(error) => {
                warn!(%location, "copy failed: {error}");
                job.failures += 1;
            }
        }
        if index < last {
            push_status(ctx, &job, None, None).await?;
        }
    }

    let mut removal_failures = 0;
    if request.cut && job.failures == 0 {
        let roots = request.location.clone();
        let outcome = tokio::task::spawn_blocking(move || file_ops::destroy(&roots)).await?;
        removal_failures = outcome.failures;
    }
    push_status(ctx, &job, None, Some(transmit)).await?;
    if request.cut && job.failures == 0 {
        let totals = CopyTotals {
            directories: copied_directories,
            file_count: job.count_file,
            file_size: job.written_size,
        };
        cut_status(ctx, &request, &totals, removal_failures).await;
    }
    Ok(())
}

/// Total byte size of the file entries under each location.
fn selection_size(locations: &[String]) -> u64 {
    let mut total = 0;
    for location in locations {
        if let Ok(entries) = file_ops::list(Path::new(location), 0) {
            total += entries
                .iter()
                .filter(|entry| entry.kind == PathKind::File)
                .map(|entry| entry.size)
                .sum::<u64>();
        }
    }
    total
}
