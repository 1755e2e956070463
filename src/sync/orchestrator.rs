//! Sync orchestration.
//!
//! Sequences one run: enumerate local, enumerate remote, exclude,
//! reconcile, upload, delete, summarize. Enumeration failures abort the
//! run before the bucket is touched; per-file failures land in the
//! summary.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SyncOptions;
use crate::error::{Result, SyncError};
use crate::fs::local::{apply_exclusions, index_records, list_local};
use crate::fs::store::{list_remote, ObjectStore};
use crate::sync::engine::{ReconcileOptions, Reconciler};
use crate::sync::executor::{TransferExecutor, TransferReport};
use crate::sync::plan::{SyncPlan, TransferFailure};
use crate::sync::throttle::RequestLimiter;

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Every failed path with its cause, sorted by path.
    pub failures: Vec<TransferFailure>,
    pub bytes_uploaded: u64,
    pub duration: Duration,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl SyncSummary {
    /// Counts a plan would produce, with nothing applied.
    fn planned(plan: &SyncPlan) -> Self {
        Self {
            created: plan.to_create().len(),
            updated: plan.to_update().len(),
            deleted: plan.to_delete().len(),
            skipped: plan.skipped().len(),
            failed: plan.failures().len(),
            failures: plan.failures().to_vec(),
            dry_run: true,
            ..Default::default()
        }
    }

    /// Counts after the plan was applied.
    fn applied(plan: &SyncPlan, report: TransferReport) -> Self {
        let mut failures = plan.failures().to_vec();
        failures.extend(report.failures);
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        Self {
            created: report.created.len(),
            updated: report.updated.len(),
            deleted: report.deleted.len(),
            skipped: plan.skipped().len(),
            failed: failures.len(),
            failures,
            bytes_uploaded: report.bytes_uploaded,
            cancelled: report.cancelled,
            ..Default::default()
        }
    }

    /// No file failed and the run finished.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    /// Nothing needed doing.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0 && self.failed == 0
    }
}

/// Runs a full sync against one store.
pub struct SyncRunner {
    options: SyncOptions,
    store: Arc<dyn ObjectStore>,
    /// One bucket for every remote call this runner makes.
    limiter: RequestLimiter,
    cancel: CancellationToken,
}

impl SyncRunner {
    pub fn new(options: SyncOptions, store: Arc<dyn ObjectStore>) -> Self {
        let limiter = RequestLimiter::new(options.requests_per_second);
        Self {
            options,
            store,
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts outstanding work when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Limiter shared by reconciliation and transfers.
    pub fn request_limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Compute the plan without applying it.
    pub async fn plan(&self) -> Result<SyncPlan> {
        let options = &self.options;
        options.validate()?;
        let excludes = options.exclude_patterns()?;

        let records = list_local(&options.build_dir)?;
        let records = apply_exclusions(records, &excludes);
        let local = index_records(records);
        info!(files = local.len(), root = %options.build_dir.display(), "Enumerated build directory");

        let mut remote = list_remote(self.store.as_ref()).await?;
        remote.retain(|key, _| !excludes.is_excluded(key));

        Reconciler::new(self.store.clone(), ReconcileOptions::from(options))
            .with_limiter(self.limiter.clone())
            .with_cancellation(self.cancel.clone())
            .reconcile(&local, &remote)
            .await
    }

    /// Execute the run and report what happened.
    ///
    /// Returns `Err` only for fatal errors; per-file failures and
    /// cancellation are reported in the summary.
    pub async fn run(&self) -> Result<SyncSummary> {
        let started = Instant::now();
        info!(store = %self.store.display_name(), dry_run = self.options.dry_run, "Starting sync");

        let plan = match self.plan().await {
            Ok(plan) => plan,
            Err(SyncError::Cancelled) => {
                warn!("Sync cancelled during reconciliation");
                return Ok(SyncSummary {
                    cancelled: true,
                    dry_run: self.options.dry_run,
                    duration: started.elapsed(),
                    ..Default::default()
                });
            }
            Err(err) => return Err(err),
        };

        if plan.is_empty() {
            info!(skipped = plan.skipped().len(), "Nothing to do");
        }

        let mut summary = if self.options.dry_run {
            for (key, operation) in plan.transfers() {
                info!(key = %key, operation = %operation, "Would transfer");
            }
            for key in plan.to_delete() {
                info!(key = %key, "Would delete");
            }
            SyncSummary::planned(&plan)
        } else {
            let executor = TransferExecutor::new(
                self.store.clone(),
                self.options.policy_table(),
                self.options.concurrency.transfer,
            )
            .with_limiter(self.limiter.clone())
            .with_cancellation(self.cancel.clone());

            // Deletions only start once every upload has settled
            let mut report = executor.execute_transfers(&plan).await;
            if !report.cancelled {
                report.merge(executor.execute_deletions(&plan).await);
            }
            SyncSummary::applied(&plan, report)
        };
        summary.duration = started.elapsed();

        info!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            failed = summary.failed,
            "Sync finished"
        );
        Ok(summary)
    }
}
