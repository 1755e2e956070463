//! Reconciliation engine.
//!
//! Computes which local files must be created or updated remotely and
//! which remote objects are orphans. The pipeline is:
//!
//! 1. Partition by key-set membership (everything is pushed in force mode).
//! 2. Timestamp pre-filter: a remote object at least as new as the local
//!    file is treated as current and never checksummed. This is a
//!    heuristic; identical-second edits are not detected.
//! 3. With gzip preference, `.gz` keys drop out of evaluation.
//! 4. Checksum the resolved transfer source against the remote etag.
//!
//! Steps 2 and 4 run on bounded worker pools; each worker returns its
//! outcome and the outcomes are reduced into the plan after the phase.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Concurrency, SyncOptions};
use crate::error::{Result, SyncError};
use crate::fs::local::{LocalFileRecord, LocalIndex};
use crate::fs::store::{ObjectStore, RemoteIndex, RemoteObject};
use crate::sync::hash::{etag_matches, hash_file_async};
use crate::sync::plan::{SyncPlan, TransferFailure, TransferOperation};
use crate::sync::source::{is_folded_sibling, is_gzip_asset, resolve_transfer_source, TransferSource};
use crate::sync::throttle::RequestLimiter;

/// Flags that drive reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOptions {
    /// Push every local file without evaluation.
    pub force: bool,
    /// Queue remote-only keys for deletion.
    pub delete_orphans: bool,
    /// Compare and upload `.gz` siblings in place of originals.
    pub prefer_gzip: bool,
    pub concurrency: Concurrency,
}

impl From<&SyncOptions> for ReconcileOptions {
    fn from(options: &SyncOptions) -> Self {
        Self {
            force: options.force,
            delete_orphans: options.delete,
            prefer_gzip: options.prefer_gzip,
            concurrency: options.concurrency,
        }
    }
}

/// Outcome of the timestamp pre-filter for one file.
#[derive(Debug)]
enum Freshness {
    /// Remote is at least as new; skip.
    Current,
    /// Local is newer; checksum against this etag.
    Stale { etag: Option<String> },
    Failed(TransferFailure),
    Cancelled,
}

/// Outcome of the checksum comparison for one file.
#[derive(Debug)]
enum ContentCheck {
    Same,
    Changed,
    Failed(TransferFailure),
    Cancelled,
}

/// Computes a [`SyncPlan`] from local and remote snapshots.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    options: ReconcileOptions,
    limiter: RequestLimiter,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, options: ReconcileOptions) -> Self {
        Self {
            store,
            options: ReconcileOptions {
                concurrency: options.concurrency.at_least_one(),
                ..options
            },
            limiter: RequestLimiter::unlimited(),
            cancel: CancellationToken::new(),
        }
    }

    /// Gate metadata fetches through a shared limiter.
    pub fn with_limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the plan.
    ///
    /// `local` and `remote` must already have exclusions applied. Files
    /// that could not be evaluated are reported in [`SyncPlan::failures`]
    /// and queued nowhere.
    pub async fn reconcile(&self, local: &LocalIndex, remote: &RemoteIndex) -> Result<SyncPlan> {
        let opts = self.options;

        // `.gz` siblings travel as their original's content, never alone
        let candidates: Vec<&LocalFileRecord> = local
            .values()
            .filter(|r| !(opts.prefer_gzip && is_folded_sibling(&r.path, local)))
            .collect();

        let to_delete: BTreeSet<String> = if opts.delete_orphans {
            remote.keys().filter(|k| !local.contains_key(*k)).cloned().collect()
        } else {
            BTreeSet::new()
        };

        let (to_push, to_evaluate): (Vec<&LocalFileRecord>, Vec<&LocalFileRecord>) = if opts.force {
            (candidates, Vec::new())
        } else {
            candidates.into_iter().partition(|r| !remote.contains_key(&r.path))
        };

        info!(
            push = to_push.len(),
            evaluate = to_evaluate.len(),
            delete = to_delete.len(),
            force = opts.force,
            "Partitioned files by key set"
        );

        let mut skipped = BTreeSet::new();
        let mut failures = Vec::new();

        // Step 2: timestamp pre-filter
        let stale = self.filter_stale(to_evaluate, remote, &mut skipped, &mut failures).await?;

        // Step 3: pre-compressed assets are handled through their originals
        let (gzipped, stale): (Vec<_>, Vec<_>) = stale
            .into_iter()
            .partition(|(record, _)| opts.prefer_gzip && is_gzip_asset(&record.path));
        skipped.extend(gzipped.into_iter().map(|(record, _)| record.path.clone()));

        // Step 4: checksum comparison
        let changed = self.find_changed(stale, local, &mut skipped, &mut failures).await?;

        let mut to_create = BTreeSet::new();
        let mut to_update = BTreeSet::new();
        let mut sources = BTreeMap::new();

        for record in to_push.into_iter().chain(changed) {
            sources.insert(record.path.clone(), self.source_for(record, local));
            if remote.contains_key(&record.path) {
                to_update.insert(record.path.clone());
            } else {
                to_create.insert(record.path.clone());
            }
        }

        info!(
            create = to_create.len(),
            update = to_update.len(),
            delete = to_delete.len(),
            skipped = skipped.len(),
            failed = failures.len(),
            "Reconciliation complete"
        );

        Ok(SyncPlan::new(to_create, to_update, to_delete, skipped, sources, failures))
    }

    /// Drop files whose remote copy is at least as new as the local one.
    async fn filter_stale<'a>(
        &self,
        to_evaluate: Vec<&'a LocalFileRecord>,
        remote: &RemoteIndex,
        skipped: &mut BTreeSet<String>,
        failures: &mut Vec<TransferFailure>,
    ) -> Result<Vec<(&'a LocalFileRecord, Option<String>)>> {
        if to_evaluate.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = to_evaluate.len(), "Comparing modification times");

        let outcomes: Vec<(&LocalFileRecord, Freshness)> = stream::iter(to_evaluate)
            .map(move |record| async move {
                let outcome = self.freshness(record, remote.get(&record.path)).await;
                (record, outcome)
            })
            .buffer_unordered(self.options.concurrency.evaluate)
            .collect()
            .await;

        let mut stale = Vec::new();
        let mut cancelled = false;
        for (record, outcome) in outcomes {
            match outcome {
                Freshness::Current => {
                    skipped.insert(record.path.clone());
                }
                Freshness::Stale { etag } => stale.push((record, etag)),
                Freshness::Failed(failure) => failures.push(failure),
                Freshness::Cancelled => cancelled = true,
            }
        }

        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(stale)
    }

    async fn freshness(&self, record: &LocalFileRecord, listed: Option<&RemoteObject>) -> Freshness {
        if self.cancel.is_cancelled() {
            return Freshness::Cancelled;
        }

        let object = match listed {
            Some(object) if object.is_complete() => object.clone(),
            _ => {
                // Listing lacked metadata; fetch it for this key
                let stat = tokio::select! {
                    _ = self.cancel.cancelled() => return Freshness::Cancelled,
                    stat = async {
                        self.limiter.acquire().await;
                        self.store.stat(&record.path).await
                    } => stat,
                };
                match stat {
                    Ok(object) => object,
                    Err(source) => {
                        let err = SyncError::RemoteStatFailed { key: record.path.clone(), source };
                        return Freshness::Failed(TransferFailure::new(
                            &record.path,
                            TransferOperation::Evaluate,
                            err,
                        ));
                    }
                }
            }
        };

        match object.last_modified {
            Some(remote_modified) if remote_modified >= record.modified => Freshness::Current,
            _ => Freshness::Stale { etag: object.etag },
        }
    }

    /// Checksum the survivors; return those whose content differs.
    async fn find_changed<'a>(
        &self,
        stale: Vec<(&'a LocalFileRecord, Option<String>)>,
        local: &LocalIndex,
        skipped: &mut BTreeSet<String>,
        failures: &mut Vec<TransferFailure>,
    ) -> Result<Vec<&'a LocalFileRecord>> {
        if stale.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = stale.len(), "Comparing checksums");

        let outcomes: Vec<(&LocalFileRecord, ContentCheck)> = stream::iter(stale)
            .map(move |(record, etag)| async move {
                let source = self.source_for(record, local);
                let outcome = self.content_check(record, etag.as_deref(), &source).await;
                (record, outcome)
            })
            .buffer_unordered(self.options.concurrency.checksum)
            .collect()
            .await;

        let mut changed = Vec::new();
        let mut cancelled = false;
        for (record, outcome) in outcomes {
            match outcome {
                ContentCheck::Same => {
                    skipped.insert(record.path.clone());
                }
                ContentCheck::Changed => changed.push(record),
                ContentCheck::Failed(failure) => failures.push(failure),
                ContentCheck::Cancelled => cancelled = true,
            }
        }

        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(changed)
    }

    async fn content_check(&self, record: &LocalFileRecord, etag: Option<&str>, source: &TransferSource) -> ContentCheck {
        if self.cancel.is_cancelled() {
            return ContentCheck::Cancelled;
        }
        let Some(etag) = etag else {
            return ContentCheck::Changed;
        };

        match hash_file_async(&source.path).await {
            Ok(md5) if etag_matches(&md5, etag) => ContentCheck::Same,
            Ok(_) => ContentCheck::Changed,
            Err(err) => ContentCheck::Failed(TransferFailure::new(
                &record.path,
                TransferOperation::Evaluate,
                err,
            )),
        }
    }

    fn source_for(&self, record: &LocalFileRecord, local: &LocalIndex) -> TransferSource {
        resolve_transfer_source(&record.path, local, self.options.prefer_gzip).unwrap_or_else(|| {
            TransferSource {
                path: record.absolute_path.clone(),
                gzip: false,
            }
        })
    }
}
