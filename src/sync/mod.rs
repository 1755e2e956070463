//! Reconciliation and transfer.
//!
//! The engine turns local and remote snapshots into a [`SyncPlan`]; the
//! executor applies it; the orchestrator sequences a whole run.

pub mod engine;
pub mod exclude;
pub mod executor;
pub mod hash;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod source;
pub mod throttle;

pub use engine::{ReconcileOptions, Reconciler};
pub use exclude::ExcludePatterns;
pub use executor::{content_type_for, TransferExecutor, TransferReport};
pub use hash::{etag_matches, hash_bytes, hash_file, normalize_etag};
pub use orchestrator::{SyncRunner, SyncSummary};
pub use plan::{SyncPlan, TransferFailure, TransferOperation};
pub use policy::{CachePolicy, HeaderPolicy, PolicyTable};
pub use source::{resolve_transfer_source, TransferSource};
pub use throttle::RequestLimiter;
