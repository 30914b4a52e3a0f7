//! Create, write, rename, destroy and local copy.

use std::path::{Path, PathBuf};

use sharemesh_protocol::types::PathKind;

use crate::{FileOpsError, classify};

/// What a destroy pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOutcome {
    pub directories: u64,
    pub files: u64,
    pub failures: u64,
}

/// What a local copy wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
}

/// Creates an empty file or directory at `path`.
pub fn create(path: &Path, kind: PathKind) -> Result<(), FileOpsError> {
    match kind {
        PathKind::Directory => {
            std::fs::create_dir_all(path).map_err(|e| classify(path, e))?;
        }
        _ => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| classify(parent, e))?;
            }
            std::fs::File::create(path).map_err(|e| classify(path, e))?;
        }
    }
    tracing::debug!(path = %path.display(), "created {}", kind.as_str());
    Ok(())
}

/// Reads a file as text. Invalid UTF-8 sequences are replaced rather
/// than refused; remote editors still get something to show.
pub fn read_text(path: &Path) -> Result<String, FileOpsError> {
    let bytes = std::fs::read(path).map_err(|e| classify(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Overwrites a file with the given text.
pub fn write_text(path: &Path, content: &str) -> Result<(), FileOpsError> {
    std::fs::write(path, content).map_err(|e| classify(path, e))
}

/// Reads a file verbatim.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>, FileOpsError> {
    std::fs::read(path).map_err(|e| classify(path, e))
}

/// Overwrites a file with raw bytes, creating parent directories as
/// needed.
pub fn write_bytes(path: &Path, content: &[u8]) -> Result<(), FileOpsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| classify(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| classify(path, e))
}

/// Renames the artifact at `path` to `name` within the same parent,
/// returning the new path.
pub fn rename(path: &Path, name: &str) -> Result<PathBuf, FileOpsError> {
    let target = match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    };
    std::fs::rename(path, &target).map_err(|e| classify(path, e))?;
    Ok(target)
}

/// Removes each path, directories recursively. Failures are counted,
/// not fatal: one vanished path must not strand the rest.
pub fn destroy(paths: &[impl AsRef<Path>]) -> DestroyOutcome {
    let mut outcome = DestroyOutcome::default();
    for path in paths {
        let path = path.as_ref();
        let is_dir = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata.is_dir(),
            Err(error) => {
                tracing::warn!(path = %path.display(), "destroy failed: {error}");
                outcome.failures += 1;
                continue;
            }
        };
        let removal = if is_dir {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match removal {
            Ok(()) if is_dir => outcome.directories += 1,
            Ok(()) => outcome.files += 1,
            Err(error) => {
                tracing::warn!(path = %path.display(), "destroy failed: {error}");
                outcome.failures += 1;
            }
        }
    }
    outcome
}

/// Copies `source` into the directory `destination`, recursively for
/// directories. Existing artifacts at the target paths are replaced.
pub fn copy_path(source: &Path, destination: &Path) -> Result<CopyOutcome, FileOpsError> {
    let metadata = std::fs::symlink_metadata(source).map_err(|e| classify(source, e))?;
    let Some(base_name) = source.file_name() else {
        return Err(FileOpsError::NotFound(source.display().to_string()));
    };
    let target = destination.join(base_name);

    let mut outcome = CopyOutcome::default();
    if metadata.is_dir() {
        copy_tree(source, &target, &mut outcome)?;
    } else {
        copy_file(source, &target, &mut outcome)?;
    }
    Ok(outcome)
}

fn copy_tree(source: &Path, target: &Path, outcome: &mut CopyOutcome) -> Result<(), FileOpsError> {
    std::fs::create_dir_all(target).map_err(|e| classify(target, e))?;
    outcome.directories += 1;
    for entry in std::fs::read_dir(source).map_err(|e| classify(source, e))? {
        let entry = entry.map_err(|e| classify(source, e))?;
        let child = entry.path();
        let child_target = target.join(entry.file_name());
        let metadata = std::fs::symlink_metadata(&child).map_err(|e| classify(&child, e))?;
        if metadata.is_dir() {
            copy_tree(&child, &child_target, outcome)?;
        } else {
            copy_file(&child, &child_target, outcome)?;
        }
    }
    Ok(())
}

fn copy_file(source: &Path, target: &Path, outcome: &mut CopyOutcome) -> Result<(), FileOpsError> {
    let written = std::fs::copy(source, target).map_err(|e| classify(source, e))?;
    outcome.files += 1;
    outcome.bytes += written;
    Ok(())
}
