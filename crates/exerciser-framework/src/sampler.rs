//! Periodic memory sampling on a background task.

use crate::allocator::allocation_stats;
use crate::metrics::MemorySnapshot;
use crate::sink::MetricsSink;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Source of memory readings.
pub trait MemoryProbe: Send + 'static {
    fn snapshot(&mut self) -> MemorySnapshot;
}

/// Reads the tracking allocator counters and the process statistics
/// reported by the operating system.
pub struct ProcessMemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Failed to get current process ID for memory sampling: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn snapshot(&mut self) -> MemorySnapshot {
        let (system_bytes, resident_bytes) = match self.pid {
            Some(pid) => {
                self.system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::new().with_memory(),
                );
                self.system
                    .process(pid)
                    .map(|p| (p.virtual_memory(), p.memory()))
                    .unwrap_or((0, 0))
            }
            None => (0, 0),
        };
        let alloc = allocation_stats();

        MemorySnapshot {
            allocated_bytes: alloc.allocated_bytes,
            total_allocated_bytes: alloc.total_allocated_bytes,
            system_bytes,
            resident_bytes,
            allocations: alloc.allocations,
            deallocations: alloc.deallocations,
            timestamp: Utc::now(),
        }
    }
}

/// Starts memory sampling tasks.
pub struct MemorySampler;

impl MemorySampler {
    /// Spawn a task that records one snapshot every `interval`.
    ///
    /// The first snapshot is taken one interval after the call. The task runs
    /// until the returned handle is stopped or cancelled, or the runtime
    /// shuts down. Must be called from within a tokio runtime.
    pub fn start(
        interval: Duration,
        mut probe: Box<dyn MemoryProbe>,
        sink: Arc<dyn MetricsSink>,
    ) -> SamplerHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            let mut taken: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = probe.snapshot();
                        sink.record_memory(&snapshot);
                        taken += 1;
                    }
                }
            }
            debug!("Memory sampler stopped after {} snapshots", taken);
            taken
        });

        SamplerHandle { token, task }
    }
}

/// Handle to a running sampler task.
pub struct SamplerHandle {
    token: CancellationToken,
    task: JoinHandle<u64>,
}

impl SamplerHandle {
    /// Request the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it. Returns the number of snapshots taken.
    pub async fn stop(self) -> u64 {
        self.token.cancel();
        match self.task.await {
            Ok(taken) => taken,
            Err(e) => {
                warn!("Memory sampler task failed: {}", e);
                0
            }
        }
    }
}
