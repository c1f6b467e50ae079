//! Configuration types for an exerciser run.

use crate::error::ExerciserError;
use crate::statement::DEFAULT_MAX_LINE_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default memory sampling interval in milliseconds.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;

/// Configuration for an exerciser run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciserConfig {
    /// Workload file, one statement per line.
    pub workload: PathBuf,
    /// Statements run once before the workload (e.g. `CREATE TABLE`).
    #[serde(default)]
    pub schema_statements: Vec<String>,
    /// What to do when a schema statement fails.
    #[serde(default)]
    pub schema_failure_policy: SchemaFailurePolicy,
    /// Maximum size of one workload line in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Skip blank workload lines instead of sending them to the store.
    #[serde(default = "default_true")]
    pub skip_blank_lines: bool,
    /// Statement run before every workload statement (e.g. `TRUNCATE TABLE t`).
    #[serde(default)]
    pub reset_statement: Option<String>,
    /// Verification settings.
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Memory sampler settings.
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_true() -> bool {
    true
}

impl ExerciserConfig {
    /// Create a configuration for a workload file with default settings.
    pub fn new(workload: impl Into<PathBuf>) -> Self {
        Self {
            workload: workload.into(),
            schema_statements: Vec::new(),
            schema_failure_policy: SchemaFailurePolicy::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            skip_blank_lines: true,
            reset_statement: None,
            verification: VerificationConfig::default(),
            memory: MemoryConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ExerciserError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ExerciserError> {
        let config: ExerciserConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Add a schema statement.
    pub fn with_schema_statement(mut self, statement: impl Into<String>) -> Self {
        self.schema_statements.push(statement.into());
        self
    }

    /// Set the schema failure policy.
    pub fn with_schema_failure_policy(mut self, policy: SchemaFailurePolicy) -> Self {
        self.schema_failure_policy = policy;
        self
    }

    /// Set the maximum line size.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Keep or skip blank workload lines.
    pub fn with_skip_blank_lines(mut self, skip: bool) -> Self {
        self.skip_blank_lines = skip;
        self
    }

    /// Set the statement run before every workload statement.
    pub fn with_reset_statement(mut self, statement: impl Into<String>) -> Self {
        self.reset_statement = Some(statement.into());
        self
    }

    /// Set the row-count query used for verification.
    pub fn with_count_query(mut self, query: impl Into<String>) -> Self {
        self.verification.count_query = Some(query.into());
        self
    }

    /// Set the read-back query run after each verified statement.
    pub fn with_readback_query(mut self, query: impl Into<String>) -> Self {
        self.verification.readback_query = Some(query.into());
        self
    }

    /// Set the export statement run after each verified statement.
    pub fn with_export_statement(mut self, statement: impl Into<String>) -> Self {
        self.verification.export_statement = Some(statement.into());
        self
    }

    /// Set how often interleaved verification runs.
    pub fn with_cadence(mut self, cadence: VerificationCadence) -> Self {
        self.verification.cadence = cadence;
        self
    }

    /// Enable or disable the memory sampler.
    pub fn with_memory_sampler(mut self, enabled: bool) -> Self {
        self.memory.enabled = enabled;
        self
    }

    /// Set the memory sampling interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.memory.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ExerciserError> {
        if self.max_line_bytes == 0 {
            return Err(ExerciserError::Config(
                "max_line_bytes must be greater than zero".to_string(),
            ));
        }
        if self.memory.enabled && self.memory.interval_ms == 0 {
            return Err(ExerciserError::Config(
                "memory.interval_ms must be greater than zero".to_string(),
            ));
        }
        if let VerificationCadence::EveryN { n: 0 } = self.verification.cadence {
            return Err(ExerciserError::Config(
                "verification cadence every_n requires n > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Policy applied when a schema statement fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFailurePolicy {
    /// Log the failure and replay the workload anyway.
    #[default]
    BestEffort,
    /// Skip the workload and go straight to shutdown.
    FailFast,
}

/// Verification settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Scalar row-count query, e.g. `SELECT COUNT(*) FROM t`.
    #[serde(default)]
    pub count_query: Option<String>,
    /// Query whose rows are read back and discarded after verification.
    #[serde(default)]
    pub readback_query: Option<String>,
    /// Statement exporting data after verification (e.g. `SELECT ... INTO OUTFILE`).
    #[serde(default)]
    pub export_statement: Option<String>,
    /// How often interleaved verification runs.
    #[serde(default)]
    pub cadence: VerificationCadence,
}

/// How often the interleaved verification step runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VerificationCadence {
    /// After every executed statement.
    #[default]
    EveryStatement,
    /// After every `n`-th executed statement.
    EveryN { n: u64 },
    /// Only the final verification at stream end.
    StreamEnd,
}

impl VerificationCadence {
    /// Whether verification is due after the `executed`-th statement (1-based).
    pub fn is_due(&self, executed: u64) -> bool {
        match self {
            VerificationCadence::EveryStatement => true,
            VerificationCadence::EveryN { n } => *n > 0 && executed % n == 0,
            VerificationCadence::StreamEnd => false,
        }
    }
}

/// Memory sampler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    DEFAULT_SAMPLE_INTERVAL_MS
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
        }
    }
}

impl MemoryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
