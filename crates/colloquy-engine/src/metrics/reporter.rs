//! Periodic status reporting task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BatchTelemetry, TRACING_TARGET};

/// Background task logging a status snapshot every interval.
///
/// The first report is emitted one full interval after spawning. Stopping the
/// reporter never emits a final report.
#[derive(Debug)]
pub struct StatusReporter {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl StatusReporter {
    /// Spawns the reporter for the batch `batch_id`.
    pub fn spawn(batch_id: Uuid, telemetry: Arc<BatchTelemetry>, interval: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run(batch_id, telemetry, interval, cancel_token.clone()));
        Self {
            cancel_token,
            handle,
        }
    }

    /// Cancels the reporter and waits until its task has exited.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(
                target: TRACING_TARGET,
                error = %err,
                "Status reporter exited abnormally"
            );
        }
    }
}

#[tracing::instrument(
    skip_all,
    fields(batch_id = %batch_id, interval_secs = interval.as_secs()),
    target = TRACING_TARGET,
    name = "status_reporter"
)]
async fn run(
    batch_id: Uuid,
    telemetry: Arc<BatchTelemetry>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                tracing::trace!(target: TRACING_TARGET, "Status reporter stopped");
                break;
            }

            _ = ticker.tick() => {
                telemetry.snapshot_and_reset().log();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reports_reset_retry_counter() {
        let telemetry = Arc::new(BatchTelemetry::new(10));
        telemetry.record_retry();
        telemetry.record_retry();

        let reporter = StatusReporter::spawn(
            Uuid::now_v7(),
            Arc::clone(&telemetry),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(telemetry.retries_since_report(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(telemetry.retries_since_report(), 0);
        assert_eq!(telemetry.total_retries(), 2);

        reporter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick_emits_nothing() {
        let telemetry = Arc::new(BatchTelemetry::new(1));
        telemetry.record_retry();

        let reporter = StatusReporter::spawn(
            Uuid::now_v7(),
            Arc::clone(&telemetry),
            Duration::from_secs(60),
        );
        tokio::task::yield_now().await;
        reporter.stop().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(telemetry.retries_since_report(), 1);
    }
}
