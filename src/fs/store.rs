use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::SyncError;

/// Object visibility applied on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acl {
    /// Bucket default (usually private).
    #[default]
    Private,
    /// Readable by anonymous clients. Every synced object uses this.
    PublicRead,
}

impl Acl {
    /// Canned ACL header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

/// A remote object as seen by one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Checksum-derived etag, without surrounding quotes.
    pub etag: Option<String>,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>, last_modified: DateTime<Utc>, etag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            last_modified: Some(last_modified),
            etag: Some(etag.into()),
        }
    }

    /// Whether a per-object stat is needed before this record can be evaluated.
    pub fn is_complete(&self) -> bool {
        self.last_modified.is_some() && self.etag.is_some()
    }
}

/// Upload request for a single object.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    /// Local file streamed as the object body.
    pub source: PathBuf,
    pub content_length: u64,
    pub content_type: String,
    pub cache_control: Option<String>,
    /// HTTP-date string.
    pub expires: Option<String>,
    pub content_encoding: Option<String>,
    pub acl: Acl,
}

/// Narrow object store contract the sync engine depends on.
///
/// Authentication, retries and listing pagination belong to the
/// implementation, never to the engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object under the store root.
    async fn list(&self) -> Result<Vec<RemoteObject>>;

    /// Fetch metadata for a single object.
    async fn stat(&self, key: &str) -> Result<RemoteObject>;

    /// Create or fully replace an object.
    async fn put(&self, request: PutRequest) -> Result<()>;

    /// Remove an object.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Human readable location, e.g. `s3://bucket/prefix`.
    fn display_name(&self) -> String;
}

/// Snapshot of the remote key set, keyed by relative path.
pub type RemoteIndex = BTreeMap<String, RemoteObject>;

/// Call the store's listing once and index the result by key.
///
/// Directory markers (keys ending in `/`) are not files and are dropped.
pub async fn list_remote(store: &dyn ObjectStore) -> crate::error::Result<RemoteIndex> {
    info!(store = %store.display_name(), "Gathering remote files");

    let objects = store.list().await.map_err(|source| SyncError::RemoteListFailed {
        bucket: store.display_name(),
        source,
    })?;

    let index: RemoteIndex = objects
        .into_iter()
        .filter(|o| !o.key.is_empty() && !o.key.ends_with('/'))
        .map(|o| (o.key.trim_start_matches('/').to_string(), o))
        .collect();

    debug!(count = index.len(), "Remote listing complete");
    Ok(index)
}
