//! Error types for the exerciser framework.

use datastore_port::StoreError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Bootstrap step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    EngineStart,
    ConnectionOpen,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapStage::EngineStart => write!(f, "engine start"),
            BootstrapStage::ConnectionOpen => write!(f, "connection open"),
        }
    }
}

/// Errors that stop an exerciser run before it produces a report.
#[derive(Error, Debug)]
pub enum ExerciserError {
    /// The data store could not be brought up. Unrecoverable.
    #[error("Bootstrap failed during {stage}: {source}")]
    Bootstrap {
        stage: BootstrapStage,
        #[source]
        source: StoreError,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while loading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML configuration.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ExerciserError {
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, ExerciserError::Bootstrap { .. })
    }
}

/// Errors produced while streaming statements from a workload file.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The workload file could not be opened.
    #[error("Failed to open workload file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading from the file failed.
    #[error("Failed to read line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    /// A line is longer than the configured bound.
    #[error("Line {line} exceeds the maximum line size of {limit} bytes")]
    LineTooLong { line: u64, limit: usize },

    /// A line is not valid UTF-8.
    #[error("Line {line} is not valid UTF-8")]
    InvalidUtf8 { line: u64 },
}

impl SourceError {
    /// Line number the error refers to, when there is one.
    pub fn line(&self) -> Option<u64> {
        match self {
            SourceError::Open { .. } => None,
            SourceError::Read { line, .. }
            | SourceError::LineTooLong { line, .. }
            | SourceError::InvalidUtf8 { line } => Some(*line),
        }
    }
}
