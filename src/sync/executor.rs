//! Transfer executor.
//!
//! Applies a [`SyncPlan`] to the object store on a bounded pool. A failed
//! file is recorded and the batch carries on; nothing is rolled back.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::fs::store::{Acl, ObjectStore, PutRequest};
use crate::sync::plan::{SyncPlan, TransferFailure, TransferOperation};
use crate::sync::policy::PolicyTable;
use crate::sync::source::TransferSource;
use crate::sync::throttle::RequestLimiter;

/// Content type for a key, inferred from its extension.
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key).first_or_octet_stream().to_string()
}

/// What happened to each queued file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub failures: Vec<TransferFailure>,
    pub bytes_uploaded: u64,
    /// Some queued files were never attempted.
    pub cancelled: bool,
}

impl TransferReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Done { key, operation, bytes } => {
                self.bytes_uploaded += bytes;
                match operation {
                    TransferOperation::Create => self.created.push(key),
                    TransferOperation::Update => self.updated.push(key),
                    TransferOperation::Delete => self.deleted.push(key),
                    TransferOperation::Evaluate => {}
                }
            }
            Outcome::Failed(failure) => self.failures.push(failure),
            Outcome::Cancelled => self.cancelled = true,
        }
    }

    fn sort(&mut self) {
        self.created.sort();
        self.updated.sort();
        self.deleted.sort();
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: TransferReport) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
        self.failures.extend(other.failures);
        self.bytes_uploaded += other.bytes_uploaded;
        self.cancelled |= other.cancelled;
        self.sort();
    }
}

#[derive(Debug)]
enum Outcome {
    Done { key: String, operation: TransferOperation, bytes: u64 },
    Failed(TransferFailure),
    Cancelled,
}

/// Uploads and deletes objects with bounded parallelism.
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    policies: PolicyTable,
    concurrency: usize,
    limiter: RequestLimiter,
    cancel: CancellationToken,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn ObjectStore>, policies: PolicyTable, concurrency: usize) -> Self {
        Self {
            store,
            policies,
            concurrency: concurrency.max(1),
            limiter: RequestLimiter::unlimited(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Upload a new object. Returns the number of bytes sent.
    pub async fn create(&self, key: &str, source: &TransferSource) -> Result<u64, SyncError> {
        self.upload(key, source, TransferOperation::Create).await
    }

    /// Replace an existing object in full.
    pub async fn update(&self, key: &str, source: &TransferSource) -> Result<u64, SyncError> {
        self.upload(key, source, TransferOperation::Update).await
    }

    /// Remove an object.
    pub async fn delete(&self, key: &str) -> Result<(), SyncError> {
        self.limiter.acquire().await;
        info!(key = %key, "Deleting");
        self.store.delete(key).await.map_err(|source| SyncError::Transfer {
            path: key.to_string(),
            operation: TransferOperation::Delete,
            source,
        })
    }

    /// Build the upload request for `key`, headers included.
    ///
    /// The body is not read here; the store streams it from the source.
    pub async fn build_request(&self, key: &str, source: &TransferSource) -> Result<PutRequest, SyncError> {
        let metadata = tokio::fs::metadata(&source.path)
            .await
            .map_err(|e| SyncError::from_io_error(e, "reading", Some(source.path.clone())))?;

        // Content type comes from the logical key, not the .gz source
        let content_type = content_type_for(key);
        let policy = self.policies.resolve(&content_type);
        let content_encoding = policy
            .content_encoding
            .clone()
            .or_else(|| source.gzip.then(|| "gzip".to_string()));

        Ok(PutRequest {
            key: key.to_string(),
            source: source.path.clone(),
            content_length: metadata.len(),
            cache_control: policy.cache_control.clone(),
            expires: policy.expires_header(),
            content_encoding,
            content_type,
            acl: Acl::PublicRead,
        })
    }

    async fn upload(&self, key: &str, source: &TransferSource, operation: TransferOperation) -> Result<u64, SyncError> {
        let transfer_err = |source: anyhow::Error| SyncError::Transfer {
            path: key.to_string(),
            operation,
            source,
        };

        let request = self
            .build_request(key, source)
            .await
            .map_err(|e| transfer_err(anyhow::Error::new(e)))?;
        let bytes = request.content_length;

        self.limiter.acquire().await;
        match operation {
            TransferOperation::Create => info!(key = %key, bytes, "Creating"),
            _ => info!(key = %key, bytes, "Updating"),
        }
        self.store.put(request).await.map_err(transfer_err)?;
        Ok(bytes)
    }

    /// Run every create and update in the plan.
    pub async fn execute_transfers(&self, plan: &SyncPlan) -> TransferReport {
        let mut report = TransferReport::default();
        if plan.transfer_count() == 0 {
            return report;
        }
        info!(count = plan.transfer_count(), concurrency = self.concurrency, "Applying updates");

        let outcomes: Vec<Outcome> = stream::iter(plan.transfers())
            .map(|(key, operation)| self.run_transfer(plan, key, operation))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        report.sort();
        report
    }

    /// Run every deletion in the plan.
    pub async fn execute_deletions(&self, plan: &SyncPlan) -> TransferReport {
        let mut report = TransferReport::default();
        if plan.to_delete().is_empty() {
            return report;
        }
        info!(count = plan.to_delete().len(), "Deleting orphaned objects");

        let outcomes: Vec<Outcome> = stream::iter(plan.to_delete().iter())
            .map(|key| self.run_delete(key))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        report.sort();
        report
    }

    async fn run_transfer(&self, plan: &SyncPlan, key: &str, operation: TransferOperation) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let Some(source) = plan.source_for(key) else {
            return Outcome::Failed(TransferFailure::new(key, operation, "no transfer source resolved"));
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Outcome::Cancelled,
            result = self.upload(key, source, operation) => result,
        };

        match result {
            Ok(bytes) => Outcome::Done { key: key.to_string(), operation, bytes },
            Err(err) => {
                warn!(key = %key, error = %err, "Transfer failed");
                Outcome::Failed(TransferFailure::new(key, operation, err))
            }
        }
    }

    async fn run_delete(&self, key: &str) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Outcome::Cancelled,
            result = self.delete(key) => result,
        };

        match result {
            Ok(()) => Outcome::Done {
                key: key.to_string(),
                operation: TransferOperation::Delete,
                bytes: 0,
            },
            Err(err) => {
                warn!(key = %key, error = %err, "Delete failed");
                Outcome::Failed(TransferFailure::new(key, TransferOperation::Delete, err))
            }
        }
    }
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor")
            .field("store", &self.store.display_name())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}
