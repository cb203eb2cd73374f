//! Push ledger verdicts back onto CRM records.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{Span, info, instrument, warn};
use uuid::Uuid;

use tpsync_ledger::Ledger;
use tpsync_shared::{AppConfig, EntityStatuses};

use crate::ports::CrmWriter;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;

/// Property mapping and retry schedule for the reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Set to `"true"` on every reconciled record.
    pub checked_property: String,
    pub primary_status_property: Option<String>,
    pub mobile_status_property: Option<String>,
    pub retry: RetryPolicy,
}

impl ReconcileConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        Self {
            checked_property: config.sync.checked_property.clone(),
            primary_status_property: non_empty(&config.sync.phone_status_property),
            mobile_status_property: non_empty(&config.sync.mobile_status_property),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    pub run_id: Uuid,
    pub updated: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    pub elapsed: Duration,
}

/// Property payload for one entity.
pub fn build_properties(statuses: &EntityStatuses, config: &ReconcileConfig) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert(config.checked_property.clone(), "true".to_string());
    if let (Some(property), Some(status)) = (&config.primary_status_property, statuses.primary) {
        properties.insert(property.clone(), status.to_string());
    }
    if let (Some(property), Some(status)) = (&config.mobile_status_property, statuses.mobile) {
        properties.insert(property.clone(), status.to_string());
    }
    properties
}

/// Every payload the pass would send, in ledger order.
pub fn plan(ledger: &Ledger, config: &ReconcileConfig) -> Vec<(String, BTreeMap<String, String>)> {
    ledger
        .entity_ids()
        .map(|id| {
            let statuses = ledger.statuses_for(id).unwrap_or_default();
            (id.to_string(), build_properties(&statuses, config))
        })
        .collect()
}

/// Update each ledger entity in the CRM, one record at a time.
///
/// Each write is retried per `config.retry`; a record that still fails is
/// counted and skipped.
#[instrument(skip_all, fields(run_id = tracing::field::Empty, entities = ledger.entity_count()))]
pub async fn reconcile<W: CrmWriter>(
    writer: &W,
    ledger: &Ledger,
    config: &ReconcileConfig,
    progress: &dyn ProgressReporter,
) -> ReconcileResult {
    let start = Instant::now();
    let run_id = Uuid::now_v7();
    Span::current().record("run_id", tracing::field::display(run_id));

    let payloads = plan(ledger, config);
    let total = payloads.len();
    progress.phase("Updating CRM records");
    info!(total, "starting reconciliation");

    let mut updated = 0;
    let mut failed_ids = Vec::new();

    for (index, (id, properties)) in payloads.iter().enumerate() {
        let label = format!("update {id}");
        match config
            .retry
            .run(&label, || writer.update_properties(id, properties))
            .await
        {
            Ok(()) => updated += 1,
            Err(e) => {
                warn!(entity_id = %id, error = %e, "giving up on record");
                failed_ids.push(id.clone());
            }
        }
        progress.record_applied(index + 1, total);
    }

    let result = ReconcileResult {
        run_id,
        updated,
        failed: failed_ids.len(),
        failed_ids,
        elapsed: start.elapsed(),
    };
    info!(
        updated = result.updated,
        failed = result.failed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "reconciliation complete"
    );
    progress.finished(&format!(
        "{} records updated, {} failed",
        result.updated, result.failed
    ));
    result
}
