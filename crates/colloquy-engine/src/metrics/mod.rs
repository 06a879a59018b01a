//! Per-batch telemetry: sequence timings, token counts and retry volume.
//!
//! - [`SequenceMetrics`] - timing and token counts of one conversation
//! - [`BatchTelemetry`] - shared counters written by drivers and executors
//! - [`StatusReporter`] - background task that logs a [`StatusSnapshot`] periodically

mod reporter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use colloquy_core::TokenUsage;
pub use reporter::StatusReporter;
use tokio::time::Instant;

/// Tracing target for periodic status reports.
pub const TRACING_TARGET: &str = "colloquy_engine::metrics";

/// Timing and token counts of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceMetrics {
    /// When the conversation started.
    pub start_time: Instant,
    /// Set once every turn succeeded.
    pub duration: Option<Duration>,
    /// Tokens accumulated over all successful turns.
    pub usage: TokenUsage,
}

impl SequenceMetrics {
    /// Starts a record at the current instant.
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
            duration: None,
            usage: TokenUsage::default(),
        }
    }

    /// True once the duration is recorded.
    pub fn is_finished(&self) -> bool {
        self.duration.is_some()
    }
}

/// Aggregate view logged by the status reporter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    /// Turn requests not yet issued. Negative for uneven sequence lengths.
    pub remaining: i64,
    /// Conversations that finished every turn.
    pub completed: usize,
    /// Mean duration of finished conversations.
    pub average_duration: Option<Duration>,
    /// Mean input tokens of finished conversations.
    pub average_input_tokens: Option<f64>,
    /// Mean output tokens of finished conversations.
    pub average_output_tokens: Option<f64>,
    /// Retries since the previous snapshot.
    pub retries: u64,
}

impl StatusSnapshot {
    /// Emits the snapshot as one structured log line.
    pub fn log(&self) {
        match self.average_duration {
            Some(duration) => tracing::info!(
                target: TRACING_TARGET,
                remaining = self.remaining,
                completed = self.completed,
                avg_duration_secs = duration.as_secs_f64(),
                avg_input_tokens = self.average_input_tokens.unwrap_or_default(),
                avg_output_tokens = self.average_output_tokens.unwrap_or_default(),
                retries = self.retries,
                "Batch status"
            ),
            None => tracing::info!(
                target: TRACING_TARGET,
                remaining = self.remaining,
                retries = self.retries,
                "Batch status"
            ),
        }
    }
}

/// Counters shared across every driver and executor of one batch.
///
/// Each sequence index is written only by its own driver; the reporter reads.
#[derive(Debug, Default)]
pub struct BatchTelemetry {
    remaining: AtomicI64,
    retries_since_report: AtomicU64,
    total_retries: AtomicU64,
    sequences: Mutex<HashMap<usize, SequenceMetrics>>,
}

impl BatchTelemetry {
    /// Creates telemetry expecting `remaining` turn requests.
    pub fn new(remaining: i64) -> Self {
        Self {
            remaining: AtomicI64::new(remaining),
            ..Self::default()
        }
    }

    fn sequences(&self) -> MutexGuard<'_, HashMap<usize, SequenceMetrics>> {
        self.sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the start of the conversation at `index`.
    pub fn start_sequence(&self, index: usize) {
        self.sequences().insert(index, SequenceMetrics::start());
    }

    /// Adds the tokens of one successful turn.
    pub fn record_usage(&self, index: usize, usage: TokenUsage) {
        if let Some(metrics) = self.sequences().get_mut(&index) {
            metrics.usage += usage;
        }
    }

    /// Marks the conversation at `index` as finished.
    pub fn finish_sequence(&self, index: usize) {
        if let Some(metrics) = self.sequences().get_mut(&index) {
            metrics.duration = Some(metrics.start_time.elapsed());
        }
    }

    /// Returns the record of the conversation at `index`.
    pub fn sequence(&self, index: usize) -> Option<SequenceMetrics> {
        self.sequences().get(&index).copied()
    }

    /// Counts one issued turn request.
    pub fn turn_issued(&self) {
        self.remaining.fetch_sub(1, Ordering::Relaxed);
    }

    /// Turn requests not yet issued.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Counts one retried request.
    pub fn record_retry(&self) {
        self.retries_since_report.fetch_add(1, Ordering::Relaxed);
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Retries since the last snapshot.
    pub fn retries_since_report(&self) -> u64 {
        self.retries_since_report.load(Ordering::Relaxed)
    }

    /// Retries over the whole batch.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Builds a snapshot and resets the per-report retry counter.
    pub fn snapshot_and_reset(&self) -> StatusSnapshot {
        let finished: Vec<SequenceMetrics> = self
            .sequences()
            .values()
            .filter(|metrics| metrics.is_finished())
            .copied()
            .collect();

        let completed = finished.len();
        let (average_duration, average_input_tokens, average_output_tokens) = if completed == 0 {
            (None, None, None)
        } else {
            let count = completed as f64;
            let duration: Duration = finished.iter().filter_map(|m| m.duration).sum();
            let usage: TokenUsage = finished.iter().map(|m| m.usage).sum();
            (
                Some(duration.div_f64(count)),
                Some(usage.input_tokens as f64 / count),
                Some(usage.output_tokens as f64 / count),
            )
        };

        StatusSnapshot {
            remaining: self.remaining(),
            completed,
            average_duration,
            average_input_tokens,
            average_output_tokens,
            retries: self.retries_since_report.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_goes_negative_without_panicking() {
        let telemetry = BatchTelemetry::new(1);
        telemetry.turn_issued();
        telemetry.turn_issued();
        assert_eq!(telemetry.remaining(), -1);
    }

    #[test]
    fn test_retry_counters() {
        let telemetry = BatchTelemetry::new(0);
        telemetry.record_retry();
        telemetry.record_retry();

        assert_eq!(telemetry.snapshot_and_reset().retries, 2);
        assert_eq!(telemetry.retries_since_report(), 0);
        assert_eq!(telemetry.total_retries(), 2);
        assert_eq!(telemetry.snapshot_and_reset().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_averages_only_finished_sequences() {
        let telemetry = BatchTelemetry::new(4);

        telemetry.start_sequence(0);
        telemetry.start_sequence(1);
        telemetry.start_sequence(2);
        telemetry.record_usage(0, TokenUsage::new(10, 4));
        telemetry.record_usage(1, TokenUsage::new(30, 8));
        telemetry.record_usage(2, TokenUsage::new(1000, 1000));

        tokio::time::sleep(Duration::from_secs(2)).await;
        telemetry.finish_sequence(0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        telemetry.finish_sequence(1);

        let snapshot = telemetry.snapshot_and_reset();
        assert_eq!(snapshot.completed, 2);
        let average = snapshot.average_duration.unwrap();
        assert!(average >= Duration::from_secs(3));
        assert!(average < Duration::from_millis(3010));
        assert_eq!(snapshot.average_input_tokens, Some(20.0));
        assert_eq!(snapshot.average_output_tokens, Some(6.0));
        assert!(!telemetry.sequence(2).unwrap().is_finished());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = BatchTelemetry::new(3).snapshot_and_reset();
        assert_eq!(snapshot.remaining, 3);
        assert_eq!(snapshot.completed, 0);
        assert!(snapshot.average_duration.is_none());
    }
}
