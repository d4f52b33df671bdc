//! Report sinks used by the command-line tool.
//!
//! [`ConsoleReport`] prints a fixed-width table; [`JsonReport`] writes the
//! machine-readable report file.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::aggregator::RunSummary;
use crate::error::Result;
use crate::ports::ReportSink;
use crate::result::ProbeResult;

/// Top-level shape of the JSON report.
#[derive(Debug, Serialize)]
pub struct JsonDocument<'a> {
    /// When the report was produced.
    pub timestamp: DateTime<Local>,
    /// Camera description.
    pub camera: &'a str,
    /// Tallies.
    pub summary: Tally,
    /// Every result in run order.
    pub results: &'a [ProbeResult],
}

/// Result tallies as they appear in the JSON report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Results recorded.
    pub total: usize,
    /// Passing results.
    pub passed: usize,
    /// Failing results.
    pub failed: usize,
    /// Skipped results.
    pub skipped: usize,
}

impl From<&RunSummary> for Tally {
    fn from(summary: &RunSummary) -> Self {
        Self {
            total: summary.total,
            passed: summary.pass_count,
            failed: summary.fail_count,
            skipped: summary.skip_count,
        }
    }
}

impl<'a> JsonDocument<'a> {
    /// Document for `summary`, stamped now.
    pub fn new(camera: &'a str, summary: &'a RunSummary) -> Self {
        Self {
            timestamp: Local::now(),
            camera,
            summary: Tally::from(summary),
            results: &summary.results,
        }
    }
}

/// Writes the JSON report to a file, creating parent directories.
#[derive(Debug, Clone)]
pub struct JsonReport {
    path: PathBuf,
}

impl JsonReport {
    /// Sink writing to `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReport {
    fn publish(&mut self, camera: &str, summary: &RunSummary) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let document = JsonDocument::new(camera, summary);
        let text = serde_json::to_string_pretty(&document).map_err(std::io::Error::other)?;
        fs::write(&self.path, text)?;
        info!(path = %self.path.display(), "JSON report written");
        Ok(())
    }
}

/// Prints a results table to any writer.
pub struct ConsoleReport<W> {
    out: W,
}

impl<W: Write> ConsoleReport<W> {
    /// Table printer writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for ConsoleReport<W> {
    fn publish(&mut self, camera: &str, summary: &RunSummary) -> Result<()> {
        writeln!(self.out, "Camera: {camera}")?;
        writeln!(self.out, "{:<20} {:<6} Message", "Test", "Status")?;
        writeln!(self.out, "{}", "-".repeat(72))?;
        for result in &summary.results {
            writeln!(
                self.out,
                "{:<20} {:<6} {}",
                result.probe().name(),
                result.status().to_string(),
                result.message()
            )?;
        }
        writeln!(self.out, "{}", "-".repeat(72))?;
        writeln!(self.out, "{}", summary.status_line())?;
        Ok(())
    }
}
