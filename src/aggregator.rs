//! Per-run tally of probe results.

use serde::Serialize;

use crate::result::{ProbeResult, ProbeStatus};

/// Snapshot of the results recorded for the current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Results recorded.
    pub total: usize,
    /// Results with status `PASS`.
    pub pass_count: usize,
    /// Results with status `FAIL`.
    pub fail_count: usize,
    /// Results with status `SKIP`.
    pub skip_count: usize,
    /// Every result, in completion order.
    pub results: Vec<ProbeResult>,
}

impl RunSummary {
    /// One-line tally, e.g. `Tests: 3 | Pass: 2 | Fail: 1 | Skip: 0`.
    #[must_use]
    pub fn status_line(&self) -> String {
        format!(
            "Tests: {} | Pass: {} | Fail: {} | Skip: {}",
            self.total, self.pass_count, self.fail_count, self.skip_count
        )
    }

    /// Whether any probe failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.fail_count > 0
    }
}

/// Collects results as probes complete. The counts always add up to the
/// number of results held.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    summary: RunSummary,
    runs_started: u32,
}

impl ResultAggregator {
    /// An aggregator that has never seen a run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous run and mark a new one as started.
    pub fn begin_run(&mut self) {
        self.clear();
        self.runs_started = self.runs_started.saturating_add(1);
    }

    /// Append a result and update the tallies.
    pub fn record(&mut self, result: ProbeResult) {
        match result.status() {
            ProbeStatus::Pass => self.summary.pass_count += 1,
            ProbeStatus::Fail => self.summary.fail_count += 1,
            ProbeStatus::Skip => self.summary.skip_count += 1,
        }
        self.summary.total += 1;
        self.summary.results.push(result);
    }

    /// Drop every recorded result.
    pub fn clear(&mut self) {
        self.summary = RunSummary::default();
    }

    /// Copy of the current tallies and results.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.summary.clone()
    }

    /// Number of runs started since creation.
    #[must_use]
    pub const fn runs_started(&self) -> u32 {
        self.runs_started
    }

    /// Tally line, or `No tests run yet` before the first run.
    #[must_use]
    pub fn status_line(&self) -> String {
        if self.runs_started == 0 && self.summary.total == 0 {
            "No tests run yet".to_owned()
        } else {
            self.summary.status_line()
        }
    }
}
