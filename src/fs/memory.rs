//! In-process object store.
//!
//! Mirrors what an S3 bucket reports (etag = hex MD5, last-modified at
//! second precision) and can be told to fail specific operations, which
//! makes it the store used by tests and local previews.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::fs::store::{ObjectStore, PutRequest, RemoteObject};
use crate::sync::hash::hash_bytes;

/// A stored object including the headers it was uploaded with.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
    pub content_encoding: Option<String>,
    pub public: bool,
}

#[derive(Default)]
struct Failures {
    listing: bool,
    stat: HashSet<String>,
    put: HashSet<String>,
    delete: HashSet<String>,
}

/// Object store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failures: Mutex<Failures>,
    /// Keys whose listing entry omits metadata, forcing a stat.
    sparse: Mutex<HashSet<String>>,
    stat_calls: AtomicUsize,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Marks one remote call as in progress until dropped.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object stamped with the current time.
    pub fn insert(&self, key: &str, body: &[u8]) {
        self.insert_at(key, body, Utc::now());
    }

    /// Store an object with an explicit last-modified time.
    pub fn insert_at(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        let object = StoredObject {
            body: body.to_vec(),
            last_modified: last_modified.trunc_subsecs(0),
            etag: hash_bytes(body),
            content_type: None,
            cache_control: None,
            expires: None,
            content_encoding: None,
            public: false,
        };
        self.lock_objects().insert(key.to_string(), object);
    }

    /// Store an object whose etag does not derive from its body.
    pub fn insert_with_etag(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>, etag: &str) {
        self.insert_at(key, body, last_modified);
        if let Some(object) = self.lock_objects().get_mut(key) {
            object.etag = etag.to_string();
        }
    }

    /// Make the listing omit metadata for `key`.
    pub fn hide_listing_metadata(&self, key: &str) {
        self.sparse.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string());
    }

    pub fn fail_listing(&self) {
        self.lock_failures().listing = true;
    }

    pub fn fail_stat(&self, key: &str) {
        self.lock_failures().stat.insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.lock_failures().put.insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.lock_failures().delete.insert(key.to_string());
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock_objects().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_objects().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_objects().keys().cloned().collect()
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::Relaxed)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Highest number of stat, put and delete calls seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_max_in_flight(&self) {
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Count a call as running, then yield so the rest of a pool can start.
    async fn enter(&self) -> InFlight<'_> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let guard = InFlight { counter: &self.in_flight };
        tokio::task::yield_now().await;
        guard
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self) -> Result<Vec<RemoteObject>> {
        if self.lock_failures().listing {
            bail!("listing denied");
        }

        let sparse = self.sparse.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(self
            .lock_objects()
            .iter()
            .map(|(key, object)| {
                if sparse.contains(key) {
                    RemoteObject { key: key.clone(), last_modified: None, etag: None }
                } else {
                    RemoteObject::new(key.clone(), object.last_modified, object.etag.clone())
                }
            })
            .collect())
    }

    async fn stat(&self, key: &str) -> Result<RemoteObject> {
        self.stat_calls.fetch_add(1, Ordering::Relaxed);
        let _running = self.enter().await;
        if self.lock_failures().stat.contains(key) {
            bail!("stat failed for {}", key);
        }

        match self.lock_objects().get(key) {
            Some(object) => Ok(RemoteObject::new(key, object.last_modified, object.etag.clone())),
            None => bail!("no such key: {}", key),
        }
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        let _running = self.enter().await;
        if self.lock_failures().put.contains(&request.key) {
            bail!("upload rejected for {}", request.key);
        }

        let body = tokio::fs::read(&request.source)
            .await
            .with_context(|| format!("Failed to read {}", request.source.display()))?;
        let object = StoredObject {
            etag: hash_bytes(&body),
            body,
            last_modified: Utc::now().trunc_subsecs(0),
            content_type: Some(request.content_type),
            cache_control: request.cache_control,
            expires: request.expires,
            content_encoding: request.content_encoding,
            public: request.acl == crate::fs::store::Acl::PublicRead,
        };
        self.lock_objects().insert(request.key, object);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        let _running = self.enter().await;
        if self.lock_failures().delete.contains(key) {
            bail!("delete rejected for {}", key);
        }

        self.lock_objects().remove(key);
        Ok(())
    }

    fn display_name(&self) -> String {
        "memory://".to_string()
    }
}
