// Centralized error handling module
// Error types with context for enumeration, reconciliation and transfers

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::sync::plan::TransferOperation;

/// Main error type for sync runs.
///
/// Enumeration and configuration errors are fatal for a run; transfer and
/// stat errors are per-file and end up in the run summary instead.
#[derive(Debug)]
pub enum SyncError {
    /// Local enumeration errors
    BuildDirNotFound { path: PathBuf },
    BuildDirUnreadable { path: PathBuf, reason: String },

    /// Remote enumeration errors
    RemoteListFailed { bucket: String, source: anyhow::Error },
    RemoteStatFailed { key: String, source: anyhow::Error },

    /// Configuration errors
    InvalidConfig { message: String },
    InvalidPattern { pattern: String, source: globset::Error },

    /// Per-file errors
    ChecksumFailed { path: PathBuf, source: io::Error },
    Transfer { path: String, operation: TransferOperation, source: anyhow::Error },

    /// Run aborted through its cancellation token
    Cancelled,

    Io { path: Option<PathBuf>, operation: String, source: io::Error },
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether this error aborts the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::BuildDirNotFound { .. }
                | SyncError::BuildDirUnreadable { .. }
                | SyncError::RemoteListFailed { .. }
                | SyncError::InvalidConfig { .. }
                | SyncError::InvalidPattern { .. }
        )
    }

    /// Shorthand for configuration failures.
    pub fn config(message: impl Into<String>) -> Self {
        SyncError::InvalidConfig { message: message.into() }
    }

    /// Create an error for a failed read under the build directory.
    pub fn from_io_error(err: io::Error, operation: &str, path: Option<PathBuf>) -> Self {
        match (err.kind(), path) {
            (io::ErrorKind::NotFound, Some(p)) if operation.contains("directory") => {
                SyncError::BuildDirNotFound { path: p }
            }
            (io::ErrorKind::PermissionDenied, Some(p)) if operation.contains("directory") => {
                SyncError::BuildDirUnreadable { path: p, reason: err.to_string() }
            }
            (_, path) => SyncError::Io {
                path,
                operation: operation.to_string(),
                source: err,
            },
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyncError::BuildDirNotFound { path } => {
                write!(f, "Build directory not found: {}\n", path.display())?;
                write!(f, "Suggestion: Run the build first or check the build_dir setting")
            }
            SyncError::BuildDirUnreadable { path, reason } => {
                write!(f, "Build directory could not be read: {}: {}\n", path.display(), reason)?;
                write!(f, "Suggestion: Check directory permissions")
            }
            SyncError::RemoteListFailed { bucket, source } => {
                write!(f, "Failed to list objects in bucket {}: {:#}\n", bucket, source)?;
                write!(f, "Suggestion: Check the bucket name, region and credentials")
            }
            SyncError::RemoteStatFailed { key, source } => {
                write!(f, "Failed to fetch metadata for {}: {:#}", key, source)
            }
            SyncError::InvalidConfig { message } => {
                write!(f, "Invalid configuration: {}\n", message)?;
                write!(f, "Suggestion: Check the sync configuration file")
            }
            SyncError::InvalidPattern { pattern, source } => {
                write!(f, "Invalid exclude pattern '{}': {}", pattern, source)
            }
            SyncError::ChecksumFailed { path, source } => {
                write!(f, "Failed to checksum {}: {}", path.display(), source)
            }
            SyncError::Transfer { path, operation, source } => {
                write!(f, "Failed to {} {}: {:#}", operation, path, source)
            }
            SyncError::Cancelled => write!(f, "Sync was cancelled"),
            SyncError::Io { path, operation, source } => {
                if let Some(p) = path {
                    write!(f, "I/O error while {} {}: {}", operation, p.display(), source)
                } else {
                    write!(f, "I/O error while {}: {}", operation, source)
                }
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::RemoteListFailed { source, .. }
            | SyncError::RemoteStatFailed { source, .. }
            | SyncError::Transfer { source, .. } => Some(&**source),
            SyncError::InvalidPattern { source, .. } => Some(source),
            SyncError::ChecksumFailed { source, .. } | SyncError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        SyncError::from_io_error(err, "unknown operation", None)
    }
}
