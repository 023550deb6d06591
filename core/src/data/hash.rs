//! Content hashing
//!
//! The digest algorithm is pluggable. Anything that maps file bytes to a
//! stable string works; the default streams the file through BLAKE3.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer used while hashing (64 KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Produces a stable digest string from file contents
pub trait ContentHasher: Send + Sync + 'static {
    /// Hash the bytes of the file at `path`
    fn hash_file(&self, path: &Path) -> io::Result<String>;

    /// Hash an in-memory buffer
    fn hash_bytes(&self, data: &[u8]) -> String;
}

/// BLAKE3 digest rendered as lower-case hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }

    fn hash_bytes(&self, data: &[u8]) -> String {
        hex::encode(blake3::hash(data).as_bytes())
    }
}
