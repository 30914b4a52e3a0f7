//! Filesystem primitives the file service calls through.
//!
//! Deliberately blocking: callers run these on the blocking pool when
//! a request is in flight. Paths arrive pre-authorized; share bounds
//! are enforced a layer up.

mod hash;
mod list;
mod ops;
mod run;

pub use hash::{hash_bytes, hash_file, read_base64, write_base64};
pub use list::{details, list, search};
pub use ops::{
    CopyOutcome, DestroyOutcome, copy_path, create, destroy, read_bytes, read_text, rename,
    write_bytes, write_text,
};
pub use run::open_path;

use std::path::Path;

/// Errors from filesystem primitives.
///
/// Missing and unauthorized paths get their own variants so their
/// display text stays recognizable when it travels as a response body.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Maps an I/O failure on `path` to the taxonomy above.
fn classify(path: &Path, error: std::io::Error) -> FileOpsError {
    match error.kind() {
        std::io::ErrorKind::NotFound => FileOpsError::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => {
            FileOpsError::Forbidden(path.display().to_string())
        }
        _ => FileOpsError::Io(error),
    }
}
