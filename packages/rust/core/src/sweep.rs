//! Full-collection compliance sweep.
//!
//! Fetches every record, skips entities already in the ledger, checks the
//! remaining phone numbers in bounded chunks and appends one ledger row per
//! number. A chunk failure stops the run; rows from earlier chunks stay.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{Span, error, info, instrument, warn};
use uuid::Uuid;

use tpsync_ledger::Ledger;
use tpsync_shared::{AppConfig, NumberCheckTask, NumberType, Record, Result};

use crate::ports::{ComplianceCheck, RecordSource};
use crate::progress::ProgressReporter;

/// Configuration for [`run_sweep`].
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Number type tag and CRM property for each phone column to check.
    pub number_fields: Vec<(NumberType, String)>,
    /// Upper bound on numbers per compliance call.
    pub batch_size: usize,
    /// Pause between consecutive chunks.
    pub chunk_delay: Duration,
    /// Check at most this many pending records; the rest wait for a later run.
    pub limit: Option<usize>,
}

impl SweepConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            number_fields: config.sync.number_fields(),
            batch_size: config.compliance.batch_size,
            chunk_delay: config.sync.chunk_delay(),
            limit: None,
        }
    }

    /// CRM properties to request when fetching records.
    pub fn fetch_properties(&self) -> Vec<String> {
        self.number_fields.iter().map(|(_, p)| p.clone()).collect()
    }
}

/// Why a sweep stopped before its last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepHalt {
    /// 1-based chunk that failed.
    pub chunk: usize,
    pub error: String,
}

/// Result of a sweep run.
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub run_id: Uuid,
    pub records_fetched: usize,
    /// Already in the ledger.
    pub records_skipped: usize,
    /// Not in the ledger and carrying at least one phone number.
    pub records_pending: usize,
    /// Pending records left for a later run because of `limit`.
    pub records_deferred: usize,
    pub tasks_total: usize,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub numbers_checked: usize,
    pub listed: usize,
    pub halted: Option<SweepHalt>,
    pub elapsed: Duration,
}

impl fmt::Display for SweepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records fetched, {} already checked, {} checked now ({} numbers, {} listed), chunks {}/{}",
            self.records_fetched,
            self.records_skipped,
            self.records_pending - self.records_deferred,
            self.numbers_checked,
            self.listed,
            self.chunks_completed,
            self.chunks_total,
        )?;
        if self.records_deferred > 0 {
            write!(f, ", {} deferred", self.records_deferred)?;
        }
        if let Some(halt) = &self.halted {
            write!(f, "; halted at chunk {}: {}", halt.chunk, halt.error)?;
        }
        Ok(())
    }
}

/// Tasks produced from a record set, plus how records were classified.
#[derive(Debug, Default)]
pub struct TaskPlan {
    pub tasks: Vec<NumberCheckTask>,
    pub skipped: usize,
    pub pending: usize,
    pub deferred: usize,
}

/// Build check tasks for every record not yet in the ledger.
///
/// One task per configured phone column that has a value. Records with no
/// phone numbers produce nothing and are not counted as pending.
pub fn build_tasks(records: &[Record], ledger: &Ledger, config: &SweepConfig) -> TaskPlan {
    let mut plan = TaskPlan::default();

    for record in records {
        if ledger.is_checked(&record.id) {
            plan.skipped += 1;
            continue;
        }

        let tasks: Vec<NumberCheckTask> = config
            .number_fields
            .iter()
            .filter_map(|(number_type, property)| {
                record.get(property).map(|phone| NumberCheckTask {
                    entity_id: record.id.clone(),
                    number_type: *number_type,
                    phone_number: phone.to_string(),
                })
            })
            .collect();
        if tasks.is_empty() {
            continue;
        }

        plan.pending += 1;
        if config.limit.is_some_and(|limit| plan.pending > limit) {
            plan.deferred += 1;
            continue;
        }
        plan.tasks.extend(tasks);
    }

    plan
}

/// Run one sweep over the whole collection.
#[instrument(skip_all, fields(run_id = tracing::field::Empty))]
pub async fn run_sweep<S, C>(
    source: &S,
    checker: &C,
    ledger: &mut Ledger,
    config: &SweepConfig,
    progress: &dyn ProgressReporter,
) -> Result<SweepResult>
where
    S: RecordSource,
    C: ComplianceCheck,
{
    let start = Instant::now();
    let run_id = Uuid::now_v7();
    Span::current().record("run_id", tracing::field::display(run_id));

    info!(ledger = %ledger.path().display(), checked = ledger.entity_count(), "starting sweep");

    progress.phase("Fetching records");
    let records = source.fetch_all(&config.fetch_properties()).await?;
    info!(count = records.len(), "fetched records");

    let plan = build_tasks(&records, ledger, config);
    let chunk_size = config.batch_size.min(checker.max_batch()).max(1);
    let chunks: Vec<&[NumberCheckTask]> = plan.tasks.chunks(chunk_size).collect();
    let chunks_total = chunks.len();
    info!(
        skipped = plan.skipped,
        pending = plan.pending,
        deferred = plan.deferred,
        tasks = plan.tasks.len(),
        chunks = chunks_total,
        chunk_size,
        "planned sweep"
    );

    let mut result = SweepResult {
        run_id,
        records_fetched: records.len(),
        records_skipped: plan.skipped,
        records_pending: plan.pending,
        records_deferred: plan.deferred,
        tasks_total: plan.tasks.len(),
        chunks_total,
        chunks_completed: 0,
        numbers_checked: 0,
        listed: 0,
        halted: None,
        elapsed: Duration::ZERO,
    };

    if chunks_total > 0 {
        progress.phase("Checking numbers");
    }

    for (index, chunk) in chunks.iter().enumerate() {
        let chunk_no = index + 1;
        if index > 0 && !config.chunk_delay.is_zero() {
            tokio::time::sleep(config.chunk_delay).await;
        }

        progress.chunk_started(chunk_no, chunks_total, chunk.len());
        let numbers: Vec<String> = chunk.iter().map(|t| t.phone_number.clone()).collect();

        let verdicts = match checker.check_batch(&numbers).await {
            Ok(v) if v.len() == chunk.len() => v,
            Ok(v) => {
                let message = format!(
                    "compliance API returned {} results for {} numbers",
                    v.len(),
                    chunk.len()
                );
                error!(chunk = chunk_no, "{message}");
                result.halted = Some(SweepHalt {
                    chunk: chunk_no,
                    error: message,
                });
                break;
            }
            Err(e) => {
                error!(chunk = chunk_no, error = %e, "compliance check failed, stopping sweep");
                result.halted = Some(SweepHalt {
                    chunk: chunk_no,
                    error: e.to_string(),
                });
                break;
            }
        };

        let entries: Vec<_> = chunk
            .iter()
            .zip(&verdicts)
            .map(|(task, verdict)| task.clone().into_entry(verdict.status()))
            .collect();
        let listed = verdicts.iter().filter(|v| v.on_tps || v.on_ctps).count();

        if let Err(e) = ledger.append(&entries) {
            error!(chunk = chunk_no, error = %e, "ledger append failed, stopping sweep");
            result.halted = Some(SweepHalt {
                chunk: chunk_no,
                error: e.to_string(),
            });
            break;
        }

        result.chunks_completed += 1;
        result.numbers_checked += entries.len();
        result.listed += listed;
        progress.chunk_finished(chunk_no, chunks_total, listed);
        info!(chunk = chunk_no, numbers = entries.len(), listed, "chunk recorded");
    }

    result.elapsed = start.elapsed();
    if result.halted.is_some() {
        warn!(
            completed = result.chunks_completed,
            total = chunks_total,
            "sweep halted; re-run to resume from the ledger"
        );
    } else {
        info!(
            numbers = result.numbers_checked,
            listed = result.listed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "sweep complete"
        );
    }
    progress.finished(&result.to_string());

    Ok(result)
}
