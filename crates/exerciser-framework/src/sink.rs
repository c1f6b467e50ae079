//! Metrics sinks.

use crate::metrics::{MemorySnapshot, MetricSample, OperationStats};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Log target used by [`TracingSink`].
pub const METRICS_TARGET: &str = "sql_exerciser::metrics";

/// Destination for timing samples and memory snapshots.
///
/// Called from the pipeline task and the memory sampler task concurrently,
/// so implementations must be thread-safe and must not block for long.
pub trait MetricsSink: Send + Sync {
    fn record_timing(&self, sample: &MetricSample);

    fn record_memory(&self, snapshot: &MemorySnapshot);
}

/// Renders every record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record_timing(&self, sample: &MetricSample) {
        info!(
            target: METRICS_TARGET,
            operation = %sample.operation,
            duration_ms = sample.duration_ms(),
            succeeded = sample.succeeded,
            statement = sample.statement,
            timestamp = %sample.timestamp.to_rfc3339(),
            "timing"
        );
    }

    fn record_memory(&self, snapshot: &MemorySnapshot) {
        info!(
            target: METRICS_TARGET,
            allocated_bytes = snapshot.allocated_bytes,
            allocated_mib = snapshot.allocated_mib(),
            total_allocated_bytes = snapshot.total_allocated_bytes,
            total_allocated_mib = snapshot.total_allocated_mib(),
            system_bytes = snapshot.system_bytes,
            system_mib = snapshot.system_mib(),
            resident_bytes = snapshot.resident_bytes,
            resident_mib = snapshot.resident_mib(),
            allocations = snapshot.allocations,
            deallocations = snapshot.deallocations,
            timestamp = %snapshot.timestamp.to_rfc3339(),
            "memory"
        );
    }
}

#[derive(Debug, Default)]
struct Recorded {
    operations: BTreeMap<String, OperationStats>,
    samples: Vec<MetricSample>,
    memory_snapshots: u64,
    latest_memory: Option<MemorySnapshot>,
    peak_resident_bytes: u64,
}

/// Aggregates records in memory.
///
/// Per-operation statistics and memory totals are always kept. Raw timing
/// samples are only retained when built with [`RecordingSink::retaining_samples`].
#[derive(Debug, Default)]
pub struct RecordingSink {
    retain_samples: bool,
    state: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that also keeps every timing sample.
    pub fn retaining_samples() -> Self {
        Self {
            retain_samples: true,
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Statistics for every operation label seen so far.
    pub fn operations(&self) -> BTreeMap<String, OperationStats> {
        self.lock().operations.clone()
    }

    pub fn operation(&self, label: &str) -> Option<OperationStats> {
        self.lock().operations.get(label).cloned()
    }

    /// Number of samples whose label starts with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> u64 {
        self.lock()
            .operations
            .iter()
            .filter(|(label, _)| label.starts_with(prefix))
            .map(|(_, stats)| stats.count)
            .sum()
    }

    /// Retained samples, in the order they were recorded.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.lock().samples.clone()
    }

    pub fn memory_snapshots(&self) -> u64 {
        self.lock().memory_snapshots
    }

    pub fn latest_memory(&self) -> Option<MemorySnapshot> {
        self.lock().latest_memory.clone()
    }

    pub fn peak_resident_bytes(&self) -> u64 {
        self.lock().peak_resident_bytes
    }
}

impl MetricsSink for RecordingSink {
    fn record_timing(&self, sample: &MetricSample) {
        let mut state = self.lock();
        state
            .operations
            .entry(sample.operation.clone())
            .or_default()
            .record(sample);
        if self.retain_samples {
            state.samples.push(sample.clone());
        }
    }

    fn record_memory(&self, snapshot: &MemorySnapshot) {
        let mut state = self.lock();
        state.memory_snapshots += 1;
        state.peak_resident_bytes = state.peak_resident_bytes.max(snapshot.resident_bytes);
        state.latest_memory = Some(snapshot.clone());
    }
}

/// Forwards every record to each wrapped sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn record_timing(&self, sample: &MetricSample) {
        for sink in &self.sinks {
            sink.record_timing(sample);
        }
    }

    fn record_memory(&self, snapshot: &MemorySnapshot) {
        for sink in &self.sinks {
            sink.record_memory(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot(resident_bytes: u64) -> MemorySnapshot {
        MemorySnapshot {
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            system_bytes: 0,
            resident_bytes,
            allocations: 0,
            deallocations: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_recording_sink_aggregates() {
        let sink = RecordingSink::retaining_samples();
        sink.record_timing(&MetricSample::new(
            "execute.insert",
            Duration::from_millis(5),
            true,
            Some(1),
        ));
        sink.record_timing(&MetricSample::new(
            "execute.insert",
            Duration::from_millis(7),
            false,
            Some(2),
        ));
        sink.record_timing(&MetricSample::new("verify", Duration::from_millis(1), true, Some(2)));

        let insert = sink.operation("execute.insert").unwrap();
        assert_eq!(insert.count, 2);
        assert_eq!(insert.failures, 1);
        assert_eq!(sink.count_with_prefix("execute."), 2);
        assert_eq!(sink.operations().len(), 2);

        let statements: Vec<_> = sink.samples().iter().map(|s| s.statement).collect();
        assert_eq!(statements, vec![Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn test_recording_sink_without_samples() {
        let sink = RecordingSink::new();
        sink.record_timing(&MetricSample::new("schema", Duration::ZERO, true, None));

        assert!(sink.samples().is_empty());
        assert_eq!(sink.operation("schema").unwrap().count, 1);
    }

    #[test]
    fn test_recording_sink_memory_peak() {
        let sink = RecordingSink::new();
        sink.record_memory(&snapshot(300));
        sink.record_memory(&snapshot(900));
        sink.record_memory(&snapshot(500));

        assert_eq!(sink.memory_snapshots(), 3);
        assert_eq!(sink.peak_resident_bytes(), 900);
        assert_eq!(sink.latest_memory().unwrap().resident_bytes, 500);
    }

    #[test]
    fn test_fanout_forwards_to_all() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new()
            .with_sink(first.clone())
            .with_sink(second.clone())
            .with_sink(Arc::new(TracingSink));

        fanout.record_timing(&MetricSample::new("reset", Duration::ZERO, true, Some(3)));
        fanout.record_memory(&snapshot(42));

        assert_eq!(fanout.len(), 3);
        for sink in [&first, &second] {
            assert_eq!(sink.operation("reset").unwrap().count, 1);
            assert_eq!(sink.memory_snapshots(), 1);
        }
    }

    #[test]
    fn test_concurrent_recording() {
        let sink = Arc::new(RecordingSink::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.record_timing(&MetricSample::new("verify", Duration::ZERO, true, None));
                        sink.record_memory(&snapshot(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.operation("verify").unwrap().count, 400);
        assert_eq!(sink.memory_snapshots(), 400);
    }
}
