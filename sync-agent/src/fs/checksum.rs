//! Streamed content checksums.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read size per chunk; bounds memory regardless of file size.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Hex SHA-256 of everything readable from `reader`.
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of a file's full content.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    checksum_reader(File::open(path)?)
}
