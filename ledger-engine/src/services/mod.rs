//! Stateless ledger services. Each function takes an explicit store
//! transaction handle and never commits it.

pub mod hierarchy;
pub mod ledger_view;
pub mod metrics;
pub mod posting;
pub mod propagation;
pub mod retry;
pub mod schedule;

pub use metrics::{get_metrics, init_metrics};
pub use propagation::{rebuild_snapshots, repair_from, PropagationLimits, RepairOutcome};
pub use retry::{retry_on_conflict, RetryConfig};
