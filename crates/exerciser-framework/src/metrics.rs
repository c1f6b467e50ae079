//! Metric record types emitted during a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

/// One timing observation of a named operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Operation label, e.g. `execute.insert` or `verify`.
    pub operation: String,
    pub duration: Duration,
    /// Wall-clock time the operation finished.
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    /// Workload line the operation belongs to, if any.
    pub statement: Option<u64>,
}

impl MetricSample {
    pub fn new(
        operation: impl Into<String>,
        duration: Duration,
        succeeded: bool,
        statement: Option<u64>,
    ) -> Self {
        Self {
            operation: operation.into(),
            duration,
            timestamp: Utc::now(),
            succeeded,
            statement,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// One reading of process memory counters.
///
/// There are no heap-idle or heap-released fields: the system allocator
/// behind [`TrackingAllocator`](crate::allocator::TrackingAllocator) does not
/// report memory it holds unused or has returned to the OS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Live heap bytes tracked by the global allocator.
    pub allocated_bytes: u64,
    /// Bytes allocated since process start.
    pub total_allocated_bytes: u64,
    /// Virtual memory size of the process.
    pub system_bytes: u64,
    /// Resident set size of the process.
    pub resident_bytes: u64,
    /// Allocation calls since process start.
    pub allocations: u64,
    /// Deallocation calls since process start.
    pub deallocations: u64,
    pub timestamp: DateTime<Utc>,
}

impl MemorySnapshot {
    pub fn allocated_mib(&self) -> f64 {
        self.allocated_bytes as f64 / MIB
    }

    pub fn total_allocated_mib(&self) -> f64 {
        self.total_allocated_bytes as f64 / MIB
    }

    pub fn system_mib(&self) -> f64 {
        self.system_bytes as f64 / MIB
    }

    pub fn resident_mib(&self) -> f64 {
        self.resident_bytes as f64 / MIB
    }

    /// Allocations that have not been freed yet.
    pub fn live_allocations(&self) -> u64 {
        self.allocations.saturating_sub(self.deallocations)
    }
}

/// Aggregated timing statistics for one operation label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub failures: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl OperationStats {
    /// Fold one sample into the statistics.
    pub fn record(&mut self, sample: &MetricSample) {
        let ms = sample.duration_ms();
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        self.total_ms += ms;
        if !sample.succeeded {
            self.failures += 1;
        }
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count > 0 {
            self.total_ms / self.count as f64
        } else {
            0.0
        }
    }

    pub fn successes(&self) -> u64 {
        self.count - self.failures
    }
}
