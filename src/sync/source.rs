//! Transfer source resolution.
//!
//! With gzip preference enabled, a logical file `asset.js` whose sibling
//! `asset.js.gz` exists locally is checksummed and uploaded from the
//! sibling, under the `asset.js` key. The sibling never travels on its own.

use std::path::PathBuf;

use crate::fs::local::LocalIndex;

pub const GZIP_SUFFIX: &str = ".gz";

/// Where the bytes for a key come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSource {
    pub path: PathBuf,
    /// Source is a pre-compressed `.gz` sibling.
    pub gzip: bool,
}

/// Key of the pre-compressed sibling of `key`.
pub fn gzip_sibling(key: &str) -> String {
    format!("{}{}", key, GZIP_SUFFIX)
}

/// Whether the key names a pre-compressed asset.
pub fn is_gzip_asset(key: &str) -> bool {
    key.ends_with(GZIP_SUFFIX)
}

/// Pick the file whose bytes represent `key`.
///
/// Returns `None` when `key` is not in the local index.
pub fn resolve_transfer_source(key: &str, local: &LocalIndex, prefer_gzip: bool) -> Option<TransferSource> {
    let record = local.get(key)?;

    if prefer_gzip && !is_gzip_asset(key) {
        if let Some(sibling) = local.get(&gzip_sibling(key)) {
            return Some(TransferSource {
                path: sibling.absolute_path.clone(),
                gzip: true,
            });
        }
    }

    Some(TransferSource {
        path: record.absolute_path.clone(),
        gzip: false,
    })
}

/// Whether `key` is a `.gz` sibling of another local file and so must not
/// be queued independently.
pub fn is_folded_sibling(key: &str, local: &LocalIndex) -> bool {
    key.strip_suffix(GZIP_SUFFIX)
        .map(|original| !original.is_empty() && local.contains_key(original))
        .unwrap_or(false)
}
