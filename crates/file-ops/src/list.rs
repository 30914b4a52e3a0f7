//! Directory enumeration with depth limits, plus search.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sharemesh_protocol::messages::DirectoryEntry;
use sharemesh_protocol::types::PathKind;

use crate::{FileOpsError, classify};

/// Enumerates a tree breadth-first.
///
/// The root is entry 0; every entry's `parent` is the index of its
/// containing directory within the result. `depth` limits how many
/// levels below the root are expanded; 0 means unbounded.
pub fn list(root: &Path, depth: usize) -> Result<Vec<DirectoryEntry>, FileOpsError> {
    let metadata = std::fs::symlink_metadata(root).map_err(|e| classify(root, e))?;
    let root_kind = kind_of(&metadata);
    let mut entries = vec![entry_for(root, &metadata, 0)];

    let mut queue: VecDeque<(PathBuf, usize, usize)> = VecDeque::new();
    if root_kind == PathKind::Directory {
        queue.push_back((root.to_path_buf(), 0, 0));
    }

    while let Some((dir, index, level)) = queue.pop_front() {
        if depth != 0 && level >= depth {
            continue;
        }
        let children = match read_sorted(&dir) {
            Ok(children) => children,
            Err(error) => {
                // The root not being readable is the caller's problem;
                // a subdirectory going away mid-walk is not.
                if index == 0 {
                    return Err(classify(&dir, error));
                }
                tracing::debug!(path = %dir.display(), "skipping unreadable directory: {error}");
                continue;
            }
        };
        entries[index].children = children.len() as u64;

        for child in children {
            let child_index = entries.len();
            match std::fs::symlink_metadata(&child) {
                Ok(metadata) => {
                    let kind = kind_of(&metadata);
                    entries.push(entry_for(&child, &metadata, index));
                    if kind == PathKind::Directory {
                        queue.push_back((child, child_index, level + 1));
                    }
                }
                Err(_) => entries.push(error_entry(&child, index)),
            }
        }
    }

    Ok(entries)
}

/// Unbounded enumeration for size and count aggregation.
pub fn details(root: &Path) -> Result<Vec<DirectoryEntry>, FileOpsError> {
    list(root, 0)
}

/// Walks the whole tree under `root` and returns the entries whose
/// path contains `fragment`, case-insensitive. Parent indices do not
/// apply to a filtered list, so they are cleared.
pub fn search(root: &Path, fragment: &str) -> Result<Vec<DirectoryEntry>, FileOpsError> {
    let needle = fragment.to_lowercase();
    let mut matches: Vec<DirectoryEntry> = list(root, 0)?
        .into_iter()
        .skip(1)
        .filter(|entry| entry.path.to_lowercase().contains(&needle))
        .collect();
    for entry in &mut matches {
        entry.parent = 0;
    }
    Ok(matches)
}

fn read_sorted(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    children.sort();
    Ok(children)
}

fn kind_of(metadata: &Metadata) -> PathKind {
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        PathKind::Link
    } else if file_type.is_dir() {
        PathKind::Directory
    } else {
        PathKind::File
    }
}

fn modified_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn entry_for(path: &Path, metadata: &Metadata, parent: usize) -> DirectoryEntry {
    let kind = kind_of(metadata);
    DirectoryEntry {
        path: path.display().to_string(),
        kind,
        parent,
        children: 0,
        size: if kind == PathKind::File {
            metadata.len()
        } else {
            0
        },
        modified: modified_millis(metadata),
    }
}

fn error_entry(path: &Path, parent: usize) -> DirectoryEntry {
    DirectoryEntry {
        path: path.display().to_string(),
        kind: PathKind::Error,
        parent,
        children: 0,
        size: 0,
        modified: 0,
    }
}
