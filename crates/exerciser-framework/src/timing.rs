//! Timed execution of single operations.

use crate::metrics::MetricSample;
use crate::sink::MetricsSink;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wraps one operation, measures it and reports a [`MetricSample`].
///
/// A sample is emitted whether the operation succeeds or fails. Errors are
/// returned unchanged and never retried.
#[derive(Clone)]
pub struct TimedExecutor {
    sink: Arc<dyn MetricsSink>,
}

impl TimedExecutor {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Run `operation` once under `label`.
    pub async fn run<T, E, F>(
        &self,
        label: &str,
        statement: Option<u64>,
        operation: F,
    ) -> Result<(T, Duration), E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let (result, elapsed) = self.measure(label, statement, operation).await;
        result.map(|value| (value, elapsed))
    }

    /// Like [`TimedExecutor::run`], but also returns the elapsed time on failure.
    pub async fn measure<T, E, F>(
        &self,
        label: &str,
        statement: Option<u64>,
        operation: F,
    ) -> (Result<T, E>, Duration)
    where
        F: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = operation.await;
        let elapsed = start.elapsed();

        self.sink.record_timing(&MetricSample::new(
            label,
            elapsed,
            result.is_ok(),
            statement,
        ));

        (result, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    #[tokio::test(start_paused = true)]
    async fn test_success_is_timed() {
        let sink = Arc::new(RecordingSink::retaining_samples());
        let executor = TimedExecutor::new(sink.clone());

        let (value, elapsed) = executor
            .run("execute.insert", Some(4), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, String>(1u64)
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(elapsed, Duration::from_millis(50));

        let samples = sink.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].operation, "execute.insert");
        assert_eq!(samples[0].statement, Some(4));
        assert!(samples[0].succeeded);
        assert_eq!(samples[0].duration, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_still_emits_sample() {
        let sink = Arc::new(RecordingSink::retaining_samples());
        let executor = TimedExecutor::new(sink.clone());

        let err = executor
            .run("verify", None, async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<(), _>("table missing".to_string())
            })
            .await
            .unwrap_err();

        assert_eq!(err, "table missing");
        let samples = sink.samples();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].succeeded);
        assert_eq!(samples[0].duration, Duration::from_millis(20));
        assert_eq!(sink.operation("verify").unwrap().failures, 1);
    }
}
