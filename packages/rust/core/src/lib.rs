//! Sync orchestration and domain logic for tpsync.
//!
//! This crate ties the CRM client, the compliance checker and the ledger
//! together into three workflows:
//! - [`sweep`]: full-collection check, appending verdicts to the ledger
//! - [`reconcile`]: push ledger verdicts back onto CRM records
//! - [`reactor`]: per-event check and update for webhook notifications

pub mod ports;
pub mod progress;
pub mod reactor;
pub mod reconcile;
pub mod retry;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use ports::{ComplianceCheck, CrmWriter, RecordSource};
pub use progress::{ProgressReporter, SilentProgress};
pub use reactor::{EventOutcome, ReactorConfig, WebhookEvent, handle_notification};
pub use reconcile::{ReconcileConfig, ReconcileResult, reconcile};
pub use retry::RetryPolicy;
pub use sweep::{SweepConfig, SweepHalt, SweepResult, run_sweep};
