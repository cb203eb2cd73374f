//! Append-only CSV ledger of completed compliance checks.
//!
//! The [`Ledger`] replays every row of the results file once at load time and
//! keeps two views in memory: the set of entity ids already checked, and the
//! latest status per (entity, number type). New rows are only ever appended.
//!
//! **File format:** headerless CSV rows of
//! `entity_id,number_type,phone_number,status`, with number type `phone` or
//! `mobile` and status `Listed` or `Not Listed`. Short or malformed rows
//! (typically a half-written trailing row after a crash) are skipped.
//!
//! One writer per file at a time; there is no locking.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use tpsync_shared::{
    EntityStatuses, LedgerEntry, NumberType, Result, TpsStatus, TpsyncError,
};

/// Replayed view of the results file plus a handle for appending to it.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// Distinct entity ids in first-seen order.
    order: Vec<String>,
    statuses: HashMap<String, EntityStatuses>,
    rows: usize,
    skipped_rows: usize,
}

/// Aggregate counts for `tpsync status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub rows: usize,
    pub entities: usize,
    pub skipped_rows: usize,
    pub primary_listed: usize,
    pub primary_not_listed: usize,
    pub mobile_listed: usize,
    pub mobile_not_listed: usize,
}

impl Ledger {
    /// An empty ledger that will append to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            order: Vec::new(),
            statuses: HashMap::new(),
            rows: 0,
            skipped_rows: 0,
        }
    }

    /// Load the ledger at `path`, falling back to an empty ledger on any
    /// read failure so a sweep can still run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::try_load(&path) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read ledger, starting empty");
                Self::empty(path)
            }
        }
    }

    /// Load the ledger at `path`. A missing file is an empty ledger.
    pub fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no existing ledger, all records are pending");
            return Ok(Self::empty(path));
        }
        Self::replay(path)
    }

    /// Load the ledger at `path`, which must already exist.
    ///
    /// Used by the reconciliation pass, which has nothing to apply without
    /// a snapshot.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TpsyncError::ledger_io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "ledger file not found"),
            ));
        }
        Self::replay(path)
    }

    fn replay(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| TpsyncError::ledger_io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut ledger = Self::empty(path);
        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(csv_error(path, e)),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable ledger row");
                    ledger.skipped_rows += 1;
                    continue;
                }
            };

            match parse_row(&record) {
                Some(entry) => ledger.apply(&entry),
                None => {
                    debug!(row = ?record, "skipping malformed ledger row");
                    ledger.skipped_rows += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            rows = ledger.rows,
            entities = ledger.order.len(),
            skipped = ledger.skipped_rows,
            "ledger loaded"
        );
        Ok(ledger)
    }

    /// Fold one row into the in-memory views.
    fn apply(&mut self, entry: &LedgerEntry) {
        let statuses = self
            .statuses
            .entry(entry.entity_id.clone())
            .or_insert_with(|| {
                self.order.push(entry.entity_id.clone());
                EntityStatuses::default()
            });
        statuses.set(entry.number_type, entry.status);
        self.rows += 1;
    }

    /// Whether any check for `entity_id` has been recorded.
    ///
    /// Looks at the id column only: an entity with just its mobile number
    /// recorded counts as done even if its primary number never was.
    pub fn is_checked(&self, entity_id: &str) -> bool {
        self.statuses.contains_key(entity_id)
    }

    /// Latest status per number type for `entity_id`.
    pub fn statuses_for(&self, entity_id: &str) -> Option<EntityStatuses> {
        self.statuses.get(entity_id).copied()
    }

    /// Distinct entity ids in the order they first appear in the file.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Append `entries` to the file, flushing after every row and syncing at
    /// the end. Rows become visible through [`Ledger::is_checked`] as soon
    /// as they are written.
    pub fn append(&mut self, entries: &[LedgerEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TpsyncError::ledger_io(&self.path, e))?;
        terminate_partial_row(&mut file).map_err(|e| TpsyncError::ledger_io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        for entry in entries {
            writer
                .write_record([
                    entry.entity_id.as_str(),
                    entry.number_type.as_str(),
                    entry.phone_number.as_str(),
                    entry.status.as_str(),
                ])
                .map_err(|e| csv_error(&self.path, e))?;
            writer
                .flush()
                .map_err(|e| TpsyncError::ledger_io(&self.path, e))?;
            self.apply(entry);
        }

        let file = writer
            .into_inner()
            .map_err(|e| TpsyncError::ledger_io(&self.path, e.into_error()))?;
        file.sync_data()
            .map_err(|e| TpsyncError::ledger_io(&self.path, e))?;

        debug!(rows = entries.len(), total = self.rows, "appended ledger rows");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of valid rows replayed or appended.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of distinct entities.
    pub fn entity_count(&self) -> usize {
        self.order.len()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary {
            rows: self.rows,
            entities: self.order.len(),
            skipped_rows: self.skipped_rows,
            ..Default::default()
        };
        for statuses in self.statuses.values() {
            match statuses.get(NumberType::Primary) {
                Some(TpsStatus::Listed) => summary.primary_listed += 1,
                Some(TpsStatus::NotListed) => summary.primary_not_listed += 1,
                None => {}
            }
            match statuses.get(NumberType::Mobile) {
                Some(TpsStatus::Listed) => summary.mobile_listed += 1,
                Some(TpsStatus::NotListed) => summary.mobile_not_listed += 1,
                None => {}
            }
        }
        summary
    }
}

/// Parse one CSV row; `None` for anything short or unrecognized.
fn parse_row(record: &csv::StringRecord) -> Option<LedgerEntry> {
    if record.len() < 4 {
        return None;
    }
    let entity_id = record.get(0)?.trim();
    let phone_number = record.get(2)?.trim();
    if entity_id.is_empty() {
        return None;
    }
    Some(LedgerEntry {
        entity_id: entity_id.to_string(),
        number_type: record.get(1)?.parse().ok()?,
        phone_number: phone_number.to_string(),
        status: record.get(3)?.parse().ok()?,
    })
}

/// If a previous writer died mid-row, end that row so the next one starts
/// on a fresh line instead of being glued onto the fragment.
fn terminate_partial_row(file: &mut File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!("ledger ends with a partial row, terminating it");
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn csv_error(path: &Path, err: csv::Error) -> TpsyncError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => TpsyncError::ledger_io(path, e),
        other => TpsyncError::ledger_io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{other:?}")),
        ),
    }
}
