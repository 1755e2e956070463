//! Content checksums for change detection.
//!
//! S3 reports the hex MD5 of single-part uploads as the object etag, so
//! local files are hashed with MD5 to compare against it directly.

use md5::{Digest, Md5};
use std::io::Read;
use std::path::Path;

use crate::error::{Result, SyncError};

/// Hash bytes, returning the lowercase hex digest.
pub fn hash_bytes(data: &[u8]) -> String {
    hex(&Md5::digest(data))
}

/// Hash a file, streaming it through a 64KB buffer.
pub fn hash_file(path: &Path) -> Result<String> {
    let checksum_err = |source| SyncError::ChecksumFailed { path: path.to_path_buf(), source };

    let mut file = std::fs::File::open(path).map_err(checksum_err)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(checksum_err)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex(&hasher.finalize()))
}

/// Hash a file on the blocking pool.
pub async fn hash_file_async(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| SyncError::Io {
            path: None,
            operation: "joining checksum task".to_string(),
            source: std::io::Error::other(e),
        })?
}

/// Strip quotes and case differences from an etag.
pub fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_ascii_lowercase()
}

/// Whether a local checksum matches the remote etag.
///
/// Multipart etags (`<md5>-<parts>`) never match, which errs towards
/// re-uploading.
pub fn etag_matches(local_md5: &str, etag: &str) -> bool {
    normalize_etag(etag) == local_md5.to_ascii_lowercase()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
