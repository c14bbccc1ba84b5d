// src/hash.rs

//! SHA-1 helpers for ABI tags and file hashing
//!
//! Every content-addressed identity in the cache (ABI tags, port file
//! hashes, triplet hashes) is a lowercase hex SHA-1. Files are streamed so
//! large port assets never have to fit in memory.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Compute the SHA-1 of a byte slice as lowercase hex
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-1 of a file's contents as lowercase hex
pub fn file_sha1(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
