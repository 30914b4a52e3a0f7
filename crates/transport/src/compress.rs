//! Payload compression for file transfers.
//!
//! File bodies travel zstd-compressed when the source node enables it;
//! the `compression` response header tells the puller whether to
//! decode.

use std::io;

/// Level used when the node config does not set one.
pub const DEFAULT_LEVEL: i32 = 3;

pub fn compress(data: &[u8], level: i32) -> io::Result<Vec<u8>> {
    zstd::encode_all(data, level)
}

pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    zstd::decode_all(data)
}
