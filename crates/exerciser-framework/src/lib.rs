//! SQL workload exerciser framework.
//!
//! This crate replays a line-oriented SQL workload against a data store:
//! 1. Bootstrap the store and apply schema statements
//! 2. Stream statements from the workload file, timing every execution
//! 3. Verify row counts while streaming and once at the end
//! 4. Sample process memory on a background task for the whole run
//!
//! # Example
//!
//! ```ignore
//! use datastore_sqlite::SqliteStore;
//! use exerciser_framework::{ExerciserConfig, ExerciserContext, ExerciserPipeline, TracingSink};
//! use std::sync::Arc;
//!
//! let config = ExerciserConfig::new("insert.sql")
//!     .with_schema_statement("CREATE TABLE t(id INT)")
//!     .with_count_query("SELECT COUNT(*) FROM t");
//! let context = ExerciserContext::new(config, Arc::new(TracingSink));
//!
//! let report = ExerciserPipeline::new(SqliteStore::in_memory("demo"), context)
//!     .run()
//!     .await?;
//! println!("{}", report.summary());
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod sampler;
pub mod sink;
pub mod statement;
pub mod timing;

#[cfg(test)]
mod testing;

pub use allocator::{allocation_stats, AllocationStats, TrackingAllocator};
pub use config::{
    ExerciserConfig, MemoryConfig, SchemaFailurePolicy, VerificationCadence, VerificationConfig,
};
pub use error::{BootstrapStage, ExerciserError, SourceError};
pub use metrics::{MemorySnapshot, MetricSample, OperationStats};
pub use pipeline::{ExerciserContext, ExerciserPipeline, PipelinePhase};
pub use probe::{CheckOutcome, Expect};
pub use report::{ErrorCategory, ExerciseReport, RecordedError, TestStatus};
pub use sampler::{MemoryProbe, MemorySampler, ProcessMemoryProbe, SamplerHandle};
pub use sink::{FanoutSink, MetricsSink, RecordingSink, TracingSink};
pub use statement::{Statement, StatementKind, StatementSource};
pub use timing::TimedExecutor;
