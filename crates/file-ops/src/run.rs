//! Opening artifacts with the platform's default application.

use std::path::Path;

use crate::{FileOpsError, classify};

/// Hands a path to the desktop environment's opener. Detached: the
/// spawned process outlives the request.
pub fn open_path(path: &Path) -> Result<(), FileOpsError> {
    if !path.exists() {
        return Err(FileOpsError::NotFound(path.display().to_string()));
    }
    spawn_opener(path)?;
    tracing::info!(path = %path.display(), "opened with platform handler");
    Ok(())
}

#[cfg(target_os = "linux")]
fn spawn_opener(path: &Path) -> Result<(), FileOpsError> {
    detach(std::process::Command::new("xdg-open").arg(path), path)
}

#[cfg(target_os = "macos")]
fn spawn_opener(path: &Path) -> Result<(), FileOpsError> {
    detach(std::process::Command::new("open").arg(path), path)
}

#[cfg(target_os = "windows")]
fn spawn_opener(path: &Path) -> Result<(), FileOpsError> {
    detach(
        std::process::Command::new("cmd").args(["/C", "start", ""]).arg(path),
        path,
    )
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn spawn_opener(path: &Path) -> Result<(), FileOpsError> {
    let _ = path;
    Err(FileOpsError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no platform opener available",
    )))
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn detach(command: &mut std::process::Command, path: &Path) -> Result<(), FileOpsError> {
    command
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|e| classify(path, e))
}
