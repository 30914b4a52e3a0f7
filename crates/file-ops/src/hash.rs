//! SHA3-512 digests and base64 file access.

use std::io::Read;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha3::{Digest, Sha3_512};

use crate::{FileOpsError, classify};

/// Hex SHA3-512 of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha3_512::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex SHA3-512 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<String, FileOpsError> {
    let mut file = std::fs::File::open(path).map_err(|e| classify(path, e))?;
    let mut hasher = Sha3_512::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| classify(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Reads a file and encodes its contents as base64.
pub fn read_base64(path: &Path) -> Result<String, FileOpsError> {
    let bytes = std::fs::read(path).map_err(|e| classify(path, e))?;
    Ok(BASE64.encode(bytes))
}

/// Decodes base64 content and writes it to a file.
pub fn write_base64(path: &Path, content: &str) -> Result<(), FileOpsError> {
    let bytes = BASE64.decode(content)?;
    std::fs::write(path, bytes).map_err(|e| classify(path, e))
}
