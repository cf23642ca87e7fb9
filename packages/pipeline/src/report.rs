//! Run reports.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// A year that did not produce output, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearFailure {
    /// Year label.
    pub year: i32,
    /// Human-readable reason.
    pub reason: String,
}

/// Outcome of one multi-year stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Stage name (`footprint`, `volume`, `combine`, `surface`, ...).
    pub stage: String,
    /// Years that completed, in processing order.
    pub processed: Vec<i32>,
    /// Years that failed.
    pub failed: Vec<YearFailure>,
    /// Years skipped because their inputs were absent.
    pub skipped: Vec<YearFailure>,
    /// Wall-clock duration in seconds.
    pub elapsed_secs: f64,
}

impl RunReport {
    /// An empty report for `stage`.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            processed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            elapsed_secs: 0.0,
        }
    }

    /// Records a failed year.
    pub fn fail(&mut self, year: i32, reason: impl Into<String>) {
        self.failed.push(YearFailure {
            year,
            reason: reason.into(),
        });
    }

    /// Records a skipped year.
    pub fn skip(&mut self, year: i32, reason: impl Into<String>) {
        self.skipped.push(YearFailure {
            year,
            reason: reason.into(),
        });
    }

    /// Sets the elapsed time.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_secs = elapsed.as_secs_f64();
    }

    /// Whether every attempted year succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Logs the report at `info` (failures at `warn`).
    pub fn log(&self) {
        let attempted = self.processed.len() + self.failed.len();
        log::info!(
            "{} finished in {:.1}s: {}/{attempted} years processed",
            self.stage,
            self.elapsed_secs,
            self.processed.len()
        );
        for failure in &self.failed {
            log::warn!("  {} failed: {}", failure.year, failure.reason);
        }
        for skip in &self.skipped {
            log::info!("  {} skipped: {}", skip.year, skip.reason);
        }
    }
}

/// Writes `reports` as a pretty-printed JSON array.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] or [`PipelineError::Report`].
pub fn write_reports(path: &Path, reports: &[RunReport]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let json = serde_json::to_string_pretty(reports)?;
    std::fs::write(path, json).map_err(|e| PipelineError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    log::info!("Run report saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("run_report.json");

        let mut report = RunReport::new("footprint");
        report.processed.push(1975);
        report.fail(1980, "Input raster not found: x.tif");
        report.set_elapsed(Duration::from_millis(1500));
        assert!(!report.is_success());

        write_reports(&path, std::slice::from_ref(&report)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: Vec<RunReport> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, vec![report]);
        assert!(text.contains("\"year\": 1980"));
    }
}
