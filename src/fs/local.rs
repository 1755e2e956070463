use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use jwalk::WalkDir;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::sync::exclude::ExcludePatterns;

/// A file found under the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileRecord {
    /// Root-relative, forward-slash separated, no leading slash.
    pub path: String,
    pub absolute_path: PathBuf,
    /// Truncated to whole seconds, the precision object stores report.
    pub modified: DateTime<Utc>,
}

/// Local records keyed by relative path.
pub type LocalIndex = BTreeMap<String, LocalFileRecord>;

/// Index records by their relative path.
pub fn index_records(records: Vec<LocalFileRecord>) -> LocalIndex {
    records.into_iter().map(|r| (r.path.clone(), r)).collect()
}

/// Recursively list every file under `root`, dotfiles included.
///
/// A missing or unreadable root is fatal: syncing an absent build output
/// would otherwise look like "delete everything".
pub fn list_local(root: &Path) -> Result<Vec<LocalFileRecord>> {
    info!(root = %root.display(), "Gathering local files");

    let meta = fs::metadata(root)
        .map_err(|e| SyncError::from_io_error(e, "reading build directory", Some(root.to_path_buf())))?;
    if !meta.is_dir() {
        return Err(SyncError::BuildDirUnreadable {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let mut records = Vec::new();

    for entry_result in WalkDir::new(root).skip_hidden(false).sort(true) {
        let entry = entry_result.map_err(|e| SyncError::BuildDirUnreadable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let absolute_path = entry.path();
        // Follows symlinks so a link to a directory is skipped like one
        let metadata = match fs::metadata(&absolute_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Dangling symlink, or removed after the walk saw it
                warn!(path = %absolute_path.display(), "Skipping file that no longer resolves");
                continue;
            }
            Err(e) => return Err(unreadable(&absolute_path, e)),
        };
        if metadata.is_dir() {
            continue;
        }

        let Some(path) = relative_key(root, &absolute_path) else {
            continue;
        };

        let modified = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).trunc_subsecs(0))
            .map_err(|e| unreadable(&absolute_path, e))?;

        records.push(LocalFileRecord { path, absolute_path, modified });
    }

    debug!(count = records.len(), "Local listing complete");
    Ok(records)
}

fn unreadable(path: &Path, err: std::io::Error) -> SyncError {
    SyncError::BuildDirUnreadable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Drop every record whose path matches at least one exclude pattern.
pub fn apply_exclusions(records: Vec<LocalFileRecord>, excludes: &ExcludePatterns) -> Vec<LocalFileRecord> {
    let before = records.len();
    let kept: Vec<LocalFileRecord> = records
        .into_iter()
        .filter(|r| !excludes.is_excluded(&r.path))
        .collect();

    if kept.len() != before {
        debug!(excluded = before - kept.len(), "Applied exclude patterns");
    }
    kept
}

/// Convert an absolute path under `root` into a store key.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
