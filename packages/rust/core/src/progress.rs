//! Progress callbacks for long-running workflows.

/// Progress callback for reporting sweep and reconciliation status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a chunk is submitted to the compliance API.
    fn chunk_started(&self, chunk: usize, total: usize, numbers: usize);
    /// Called after a chunk has been checked and written to the ledger.
    fn chunk_finished(&self, chunk: usize, total: usize, listed: usize);
    /// Called after each record update during reconciliation.
    fn record_applied(&self, current: usize, total: usize);
    /// Called once the workflow has finished, with a one-line summary.
    fn finished(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn chunk_started(&self, _chunk: usize, _total: usize, _numbers: usize) {}
    fn chunk_finished(&self, _chunk: usize, _total: usize, _listed: usize) {}
    fn record_applied(&self, _current: usize, _total: usize) {}
    fn finished(&self, _summary: &str) {}
}
