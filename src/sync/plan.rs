//! The frozen result of one reconciliation.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::sync::source::TransferSource;

/// Kind of remote operation a file went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOperation {
    Create,
    Update,
    Delete,
    /// Metadata fetch or checksum during reconciliation.
    Evaluate,
}

impl fmt::Display for TransferOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Evaluate => "evaluate",
        };
        write!(f, "{}", name)
    }
}

/// A file that could not be processed, with enough detail to retry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub path: String,
    pub operation: TransferOperation,
    pub cause: String,
}

impl TransferFailure {
    pub fn new(path: impl Into<String>, operation: TransferOperation, cause: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            operation,
            cause: format!("{:#}", cause),
        }
    }
}

/// Pending create/update/delete operations for one run.
///
/// Built once by the reconciler and read-only afterwards; `to_create` and
/// `to_update` are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    to_create: BTreeSet<String>,
    to_update: BTreeSet<String>,
    to_delete: BTreeSet<String>,
    skipped: BTreeSet<String>,
    sources: BTreeMap<String, TransferSource>,
    failures: Vec<TransferFailure>,
}

impl SyncPlan {
    pub(crate) fn new(
        to_create: BTreeSet<String>,
        to_update: BTreeSet<String>,
        to_delete: BTreeSet<String>,
        skipped: BTreeSet<String>,
        sources: BTreeMap<String, TransferSource>,
        mut failures: Vec<TransferFailure>,
    ) -> Self {
        debug_assert!(to_create.is_disjoint(&to_update));
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        Self { to_create, to_update, to_delete, skipped, sources, failures }
    }

    pub fn to_create(&self) -> &BTreeSet<String> {
        &self.to_create
    }

    pub fn to_update(&self) -> &BTreeSet<String> {
        &self.to_update
    }

    pub fn to_delete(&self) -> &BTreeSet<String> {
        &self.to_delete
    }

    /// Files found current, either by timestamp or by checksum.
    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skipped
    }

    /// Files that could not be evaluated (failed stat or checksum).
    pub fn failures(&self) -> &[TransferFailure] {
        &self.failures
    }

    /// Resolved source for a queued create or update.
    pub fn source_for(&self, key: &str) -> Option<&TransferSource> {
        self.sources.get(key)
    }

    /// Creates then updates, each tagged with its operation.
    pub fn transfers(&self) -> impl Iterator<Item = (&str, TransferOperation)> {
        self.to_create
            .iter()
            .map(|k| (k.as_str(), TransferOperation::Create))
            .chain(self.to_update.iter().map(|k| (k.as_str(), TransferOperation::Update)))
    }

    pub fn transfer_count(&self) -> usize {
        self.to_create.len() + self.to_update.len()
    }

    /// Nothing to create, update or delete.
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}
