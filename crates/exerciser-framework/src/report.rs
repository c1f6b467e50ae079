//! Exerciser run report types.

use crate::metrics::OperationStats;
use crate::pipeline::PipelinePhase;
use crate::probe::CheckOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Result of an exerciser run.
#[derive(Debug, Clone, Serialize)]
pub struct ExerciseReport {
    /// Data store name.
    pub store: String,
    /// Workload file.
    pub workload: PathBuf,
    /// Overall run status.
    pub status: TestStatus,
    /// Pipeline phases in the order they were entered.
    pub phases: Vec<PipelinePhase>,
    /// Lines read from the workload, blank ones included.
    pub statements_read: u64,
    /// Statements sent to the store, failed ones included.
    pub statements_executed: u64,
    pub statements_failed: u64,
    /// Blank lines that were not sent to the store.
    pub statements_skipped: u64,
    /// Row count the final verification expects.
    pub expected_rows: u64,
    pub verifications_passed: u64,
    pub verifications_failed: u64,
    /// Outcome of the end-of-stream check, if it ran.
    pub final_verification: Option<CheckOutcome>,
    /// Timing statistics per operation label.
    pub operations: BTreeMap<String, OperationStats>,
    pub memory_snapshots: u64,
    pub peak_resident_bytes: u64,
    /// Errors recorded during the run.
    pub errors: Vec<RecordedError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
}

impl ExerciseReport {
    pub fn new(store: impl Into<String>, workload: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
            workload: workload.into(),
            status: TestStatus::Pending,
            phases: Vec::new(),
            statements_read: 0,
            statements_executed: 0,
            statements_failed: 0,
            statements_skipped: 0,
            expected_rows: 0,
            verifications_passed: 0,
            verifications_failed: 0,
            final_verification: None,
            operations: BTreeMap::new(),
            memory_snapshots: 0,
            peak_resident_bytes: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0.0,
        }
    }

    /// Check if the run passed.
    pub fn passed(&self) -> bool {
        matches!(self.status, TestStatus::Passed)
    }

    /// Number of recorded errors in a category.
    pub fn error_count(&self, category: ErrorCategory) -> usize {
        self.errors.iter().filter(|e| e.category == category).count()
    }

    /// Set the final status from the recorded errors.
    ///
    /// `aborted` marks a run that never finished its workload (source
    /// failure, or a schema failure under the fail-fast policy).
    pub fn finalize(&mut self, aborted: bool) {
        let failed = self.errors.iter().any(|e| {
            matches!(
                e.category,
                ErrorCategory::Statement | ErrorCategory::Verification | ErrorCategory::Shutdown
            )
        });
        self.status = if aborted {
            TestStatus::Error
        } else if failed {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        };
    }

    /// Generate a summary string.
    pub fn summary(&self) -> String {
        let phases: Vec<String> = self.phases.iter().map(|p| p.to_string()).collect();

        let mut summary = format!(
            "Exerciser Report: {}\n\
             =================\n\
             Store: {}\n\
             Workload: {}\n\
             Phases: {}\n\n",
            self.status,
            self.store,
            self.workload.display(),
            phases.join(" -> ")
        );

        summary.push_str(&format!(
            "Statements:\n\
             - Read: {}\n\
             - Executed: {}\n\
             - Failed: {}\n\
             - Skipped: {}\n\
             - Expected Rows: {}\n\n",
            self.statements_read,
            self.statements_executed,
            self.statements_failed,
            self.statements_skipped,
            self.expected_rows
        ));

        summary.push_str(&format!(
            "Verification:\n\
             - Interleaved Passed: {}\n\
             - Interleaved Failed: {}\n",
            self.verifications_passed, self.verifications_failed
        ));
        match &self.final_verification {
            Some(outcome) => summary.push_str(&format!("- Final: {outcome}\n\n")),
            None => summary.push_str("- Final: not run\n\n"),
        }

        summary.push_str(&format!(
            "Timing:\n\
             - Total Duration: {:.2} ms\n",
            self.duration_ms
        ));
        for (label, stats) in &self.operations {
            summary.push_str(&format!(
                "- {label}: {} ops ({} failed), mean {:.3} ms, min {:.3} ms, max {:.3} ms\n",
                stats.count,
                stats.failures,
                stats.mean_ms(),
                stats.min_ms,
                stats.max_ms
            ));
        }

        summary.push_str(&format!(
            "\nMemory:\n\
             - Snapshots: {}\n\
             - Peak Resident: {:.2} MiB\n",
            self.memory_snapshots,
            self.peak_resident_bytes as f64 / (1024.0 * 1024.0)
        ));

        if !self.errors.is_empty() {
            summary.push_str("\nErrors:\n");
            for error in &self.errors {
                summary.push_str(&format!("- {error}\n"));
            }
        }

        summary
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Run has not started.
    Pending,
    /// Run is in progress.
    Running,
    /// Every statement and verification succeeded.
    Passed,
    /// Completed with statement, verification or shutdown failures.
    Failed,
    /// The workload could not be replayed to the end.
    Error,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pending => write!(f, "PENDING"),
            TestStatus::Running => write!(f, "RUNNING"),
            TestStatus::Passed => write!(f, "PASSED"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Kind of a recorded, non-fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Schema,
    /// Workload file could not be opened or read.
    Io,
    Statement,
    /// A verification query ran but its result did not match.
    Verification,
    Shutdown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Schema => write!(f, "schema"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Statement => write!(f, "statement"),
            ErrorCategory::Verification => write!(f, "verification"),
            ErrorCategory::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// One error recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedError {
    pub category: ErrorCategory,
    pub operation: String,
    pub statement: Option<u64>,
    pub elapsed_ms: f64,
    pub message: String,
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.operation)?;
        if let Some(statement) = self.statement {
            write!(f, " (line {statement})")?;
        }
        write!(f, " after {:.3} ms: {}", self.elapsed_ms, self.message)
    }
}
