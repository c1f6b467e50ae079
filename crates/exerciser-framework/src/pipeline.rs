//! Exerciser pipeline orchestration.

use crate::config::{ExerciserConfig, SchemaFailurePolicy};
use crate::error::{BootstrapStage, ExerciserError};
use crate::probe::{self, CheckOutcome, Expect};
use crate::report::{ErrorCategory, ExerciseReport, RecordedError, TestStatus};
use crate::sampler::{MemoryProbe, MemorySampler, ProcessMemoryProbe, SamplerHandle};
use crate::sink::{FanoutSink, MetricsSink, RecordingSink};
use crate::statement::{Statement, StatementKind, StatementSource};
use crate::timing::TimedExecutor;
use datastore_port::{DataStore, StoreHandle};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Phase of the exerciser state machine.
///
/// ```text
/// Idle -> SchemaReady -> Streaming -> Verifying -> Draining -> Terminated
/// ```
///
/// A schema failure under the fail-fast policy and any workload source error
/// jump straight to `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    SchemaReady,
    Streaming,
    Verifying,
    Draining,
    Terminated,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::Idle => write!(f, "idle"),
            PipelinePhase::SchemaReady => write!(f, "schema_ready"),
            PipelinePhase::Streaming => write!(f, "streaming"),
            PipelinePhase::Verifying => write!(f, "verifying"),
            PipelinePhase::Draining => write!(f, "draining"),
            PipelinePhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// Everything a run needs besides the data store.
///
/// Built by the entry point and handed to [`ExerciserPipeline::new`].
pub struct ExerciserContext {
    pub config: ExerciserConfig,
    pub sink: Arc<dyn MetricsSink>,
    pub memory_probe: Box<dyn MemoryProbe>,
}

impl ExerciserContext {
    /// Context reading memory from the current process.
    pub fn new(config: ExerciserConfig, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            sink,
            memory_probe: Box::new(ProcessMemoryProbe::new()),
        }
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.memory_probe = probe;
        self
    }
}

/// Replays a workload file against a data store while timing every call,
/// sampling memory and verifying row counts.
pub struct ExerciserPipeline<S: DataStore> {
    store: StoreHandle<S>,
    config: ExerciserConfig,
    executor: TimedExecutor,
    recorder: Arc<RecordingSink>,
    memory_probe: Option<Box<dyn MemoryProbe>>,
    phase: PipelinePhase,
    report: ExerciseReport,
    expected_rows: u64,
}

impl<S: DataStore> ExerciserPipeline<S> {
    /// Create a new pipeline owning `store`.
    pub fn new(store: S, context: ExerciserContext) -> Self {
        let store = StoreHandle::new(store);
        let recorder = Arc::new(RecordingSink::new());
        let sink = FanoutSink::new()
            .with_sink(context.sink)
            .with_sink(recorder.clone());

        let mut report = ExerciseReport::new(store.name(), context.config.workload.clone());
        report.phases.push(PipelinePhase::Idle);

        Self {
            store,
            config: context.config,
            executor: TimedExecutor::new(Arc::new(sink)),
            recorder,
            memory_probe: Some(context.memory_probe),
            phase: PipelinePhase::Idle,
            report,
            expected_rows: 0,
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Run the whole pipeline.
    ///
    /// Returns `Err` only for invalid configuration and bootstrap failures;
    /// everything else is recorded in the report.
    pub async fn run(mut self) -> Result<ExerciseReport, ExerciserError> {
        self.config.validate()?;
        let start_time = Instant::now();
        self.report.status = TestStatus::Running;

        info!(
            "Starting exerciser run: store '{}', workload {}",
            self.store.name(),
            self.config.workload.display()
        );

        self.bootstrap().await?;
        let sampler = self.start_sampler();

        let mut aborted = !self.run_schema().await;
        if !aborted {
            self.transition(PipelinePhase::SchemaReady);
            self.transition(PipelinePhase::Streaming);
            aborted = !self.stream().await;
            if !aborted {
                self.transition(PipelinePhase::Verifying);
                self.final_verification().await;
            }
        }

        self.transition(PipelinePhase::Draining);
        if let Some(sampler) = sampler {
            let taken = sampler.stop().await;
            debug!("Memory sampler took {} snapshots", taken);
        }
        let close_started = Instant::now();
        if let Err(e) = self.store.conn_close().await {
            self.record_error(
                ErrorCategory::Shutdown,
                "conn_close",
                None,
                close_started.elapsed(),
                e.to_string(),
            );
        }

        self.transition(PipelinePhase::Terminated);
        let close_started = Instant::now();
        if let Err(e) = self.store.engine_close().await {
            self.record_error(
                ErrorCategory::Shutdown,
                "engine_close",
                None,
                close_started.elapsed(),
                e.to_string(),
            );
        }

        let mut report = self.report;
        report.expected_rows = self.expected_rows;
        report.operations = self.recorder.operations();
        report.memory_snapshots = self.recorder.memory_snapshots();
        report.peak_resident_bytes = self.recorder.peak_resident_bytes();
        report.duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        report.finalize(aborted);

        info!(
            "Exerciser run {} in {:.2} ms: {} statements executed, {} failed, {} errors",
            report.status,
            report.duration_ms,
            report.statements_executed,
            report.statements_failed,
            report.errors.len()
        );

        Ok(report)
    }

    fn transition(&mut self, next: PipelinePhase) {
        info!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        self.report.phases.push(next);
    }

    /// Start the engine and open the connection.
    async fn bootstrap(&mut self) -> Result<(), ExerciserError> {
        let started = Instant::now();
        if let Err(source) = self.store.engine_start().await {
            error!(
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Engine start failed: {}", source
            );
            return Err(ExerciserError::Bootstrap {
                stage: BootstrapStage::EngineStart,
                source,
            });
        }
        info!("Engine '{}' started in {:?}", self.store.name(), started.elapsed());

        let started = Instant::now();
        if let Err(source) = self.store.conn_open().await {
            error!(
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Connection open failed: {}", source
            );
            if let Err(e) = self.store.engine_close().await {
                warn!("Failed to close engine after connection failure: {}", e);
            }
            return Err(ExerciserError::Bootstrap {
                stage: BootstrapStage::ConnectionOpen,
                source,
            });
        }
        info!("Connection opened in {:?}", started.elapsed());
        Ok(())
    }

    fn start_sampler(&mut self) -> Option<SamplerHandle> {
        if !self.config.memory.enabled {
            return None;
        }
        let probe = self.memory_probe.take()?;
        let interval = self.config.memory.interval();
        info!("Memory sampler started with interval {:?}", interval);
        Some(MemorySampler::start(
            interval,
            probe,
            self.executor.sink().clone(),
        ))
    }

    /// Run the schema statements. Returns `false` when the run must skip
    /// straight to shutdown.
    async fn run_schema(&mut self) -> bool {
        let statements = self.config.schema_statements.clone();
        for statement in &statements {
            let store = &mut self.store;
            let (result, elapsed) = self
                .executor
                .measure("schema", None, store.exec(statement))
                .await;
            match result {
                Ok(_) => debug!("Schema statement applied in {:?}: {}", elapsed, statement),
                Err(e) => {
                    self.record_error(
                        ErrorCategory::Schema,
                        "schema",
                        None,
                        elapsed,
                        format!("{e} ({statement})"),
                    );
                    if self.config.schema_failure_policy == SchemaFailurePolicy::FailFast {
                        error!("Schema failed under fail-fast policy, skipping workload");
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Replay the workload. Returns `false` when the source failed.
    async fn stream(&mut self) -> bool {
        let opened = Instant::now();
        let mut source =
            match StatementSource::open(&self.config.workload, self.config.max_line_bytes).await {
                Ok(source) => source,
                Err(e) => {
                    self.record_error(ErrorCategory::Io, "read", None, opened.elapsed(), e.to_string());
                    return false;
                }
            };

        let reset_statement = self.config.reset_statement.clone();
        let cadence = self.config.verification.cadence;
        let skip_blank = self.config.skip_blank_lines;
        let mut executed: u64 = 0;

        loop {
            let read_started = Instant::now();
            let statement = match source.next_statement().await {
                Ok(Some(statement)) => statement,
                Ok(None) => break,
                Err(e) => {
                    self.record_error(
                        ErrorCategory::Io,
                        "read",
                        e.line(),
                        read_started.elapsed(),
                        e.to_string(),
                    );
                    return false;
                }
            };
            self.report.statements_read += 1;

            if skip_blank && statement.is_blank() {
                debug!(statement = statement.index, "Skipping blank line");
                self.report.statements_skipped += 1;
                continue;
            }

            if let Some(reset) = &reset_statement {
                self.reset(reset, statement.index).await;
            }
            self.execute(&statement).await;
            executed += 1;

            if cadence.is_due(executed) {
                self.interleaved_verification(statement.index).await;
            }
        }

        info!(
            "Workload finished: {} lines read from {}",
            source.lines_read(),
            source.path().display()
        );
        true
    }

    async fn reset(&mut self, reset: &str, index: u64) {
        let store = &mut self.store;
        let (result, elapsed) = self
            .executor
            .measure("reset", Some(index), store.exec(reset))
            .await;
        match result {
            Ok(_) => self.expected_rows = 0,
            Err(e) => self.record_error(
                ErrorCategory::Statement,
                "reset",
                Some(index),
                elapsed,
                e.to_string(),
            ),
        }
    }

    async fn execute(&mut self, statement: &Statement) {
        let kind = statement.kind();
        let label = kind.execute_label();
        let store = &mut self.store;
        let (result, elapsed) = self
            .executor
            .measure(label, Some(statement.index), store.exec(&statement.text))
            .await;
        self.report.statements_executed += 1;

        match result {
            Ok(affected) => {
                debug!(
                    statement = statement.index,
                    kind = %kind,
                    affected,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "Statement executed"
                );
                match kind {
                    StatementKind::Insert => self.expected_rows += affected,
                    StatementKind::Truncate => self.expected_rows = 0,
                    _ => {}
                }
            }
            Err(e) => {
                self.report.statements_failed += 1;
                self.record_error(
                    ErrorCategory::Statement,
                    label,
                    Some(statement.index),
                    elapsed,
                    e.to_string(),
                );
            }
        }
    }

    async fn interleaved_verification(&mut self, index: u64) {
        let verification = self.config.verification.clone();

        if let Some(query) = &verification.count_query {
            let expect = Expect::Count(self.expected_rows);
            let (outcome, elapsed) = self.timed_check("verify", Some(index), query, &expect).await;
            if outcome.is_pass() {
                self.report.verifications_passed += 1;
            } else {
                self.report.verifications_failed += 1;
                self.record_outcome("verify", Some(index), elapsed, &expect, &outcome);
            }
        }

        if let Some(query) = &verification.readback_query {
            let store = &mut self.store;
            let (result, elapsed) = self
                .executor
                .measure("readback", Some(index), probe::drain(store, query))
                .await;
            match result {
                Ok(rows) => debug!(statement = index, rows, "Read back rows"),
                Err(e) => self.record_error(
                    ErrorCategory::Statement,
                    "readback",
                    Some(index),
                    elapsed,
                    e.to_string(),
                ),
            }
        }

        if let Some(statement) = &verification.export_statement {
            let store = &mut self.store;
            let (result, elapsed) = self
                .executor
                .measure("export", Some(index), store.exec(statement))
                .await;
            if let Err(e) = result {
                self.record_error(
                    ErrorCategory::Statement,
                    "export",
                    Some(index),
                    elapsed,
                    e.to_string(),
                );
            }
        }
    }

    async fn final_verification(&mut self) {
        let Some(query) = self.config.verification.count_query.clone() else {
            debug!("No count query configured, skipping final verification");
            return;
        };

        let expect = Expect::Count(self.expected_rows);
        let (outcome, elapsed) = self.timed_check("verify.final", None, &query, &expect).await;
        if outcome.is_pass() {
            info!("Final verification passed: {}", outcome);
        } else {
            self.record_outcome("verify.final", None, elapsed, &expect, &outcome);
        }
        self.report.final_verification = Some(outcome);
    }

    async fn timed_check(
        &mut self,
        label: &str,
        statement: Option<u64>,
        query: &str,
        expect: &Expect,
    ) -> (CheckOutcome, Duration) {
        let check = probe::check(&mut self.store, query, expect);
        let (result, elapsed) = self
            .executor
            .measure(label, statement, async move {
                let outcome = check.await;
                if outcome.is_pass() {
                    Ok(outcome)
                } else {
                    Err(outcome)
                }
            })
            .await;
        (result.unwrap_or_else(|outcome| outcome), elapsed)
    }

    fn record_outcome(
        &mut self,
        operation: &str,
        statement: Option<u64>,
        elapsed: Duration,
        expect: &Expect,
        outcome: &CheckOutcome,
    ) {
        let category = if outcome.is_fail() {
            ErrorCategory::Verification
        } else {
            ErrorCategory::Statement
        };
        self.record_error(
            category,
            operation,
            statement,
            elapsed,
            format!("expected {expect}, got {outcome}"),
        );
    }

    fn record_error(
        &mut self,
        category: ErrorCategory,
        operation: &str,
        statement: Option<u64>,
        elapsed: Duration,
        message: String,
    ) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        if category == ErrorCategory::Verification {
            warn!(operation, statement, elapsed_ms, "Verification mismatch: {}", message);
        } else {
            error!(
                category = %category,
                operation,
                statement,
                elapsed_ms,
                "{}", message
            );
        }
        self.report.errors.push(RecordedError {
            category,
            operation: operation.to_string(),
            statement,
            elapsed_ms,
            message,
        });
    }
}
