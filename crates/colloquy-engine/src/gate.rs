//! Global backoff gate shared by every request of a batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Tracing target for gate transitions.
pub const TRACING_TARGET: &str = "colloquy_engine::gate";

/// Shared open/closed signal observed by every request before sending.
///
/// The gate counts holds: each [`close`](Self::close) adds one and each
/// [`open`](Self::open) releases one. Requests proceed only while no hold is
/// outstanding, so overlapping cooldowns keep traffic paused until the last one
/// ends. Clones share the same state.
#[derive(Debug, Clone)]
pub struct BackoffGate {
    holds: Arc<watch::Sender<usize>>,
}

impl Default for BackoffGate {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (holds, _) = watch::channel(0);
        Self {
            holds: Arc::new(holds),
        }
    }

    /// Suspends until the gate is open. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut receiver = self.holds.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|holds| *holds == 0).await;
    }

    /// Closes the gate, pausing all current and future waiters.
    pub fn close(&self) {
        self.holds.send_modify(|holds| *holds += 1);
        tracing::trace!(target: TRACING_TARGET, holds = self.holds(), "Gate closed");
    }

    /// Releases one hold; the gate opens when none remain.
    pub fn open(&self) {
        self.holds.send_modify(|holds| *holds = holds.saturating_sub(1));
        tracing::trace!(target: TRACING_TARGET, holds = self.holds(), "Gate released");
    }

    /// Returns true if requests may proceed.
    pub fn is_open(&self) -> bool {
        self.holds() == 0
    }

    /// Number of outstanding holds.
    pub fn holds(&self) -> usize {
        *self.holds.borrow()
    }

    /// Closes the gate and returns a guard that reopens it when dropped.
    pub fn hold(&self) -> GateHold {
        self.close();
        GateHold { gate: self.clone() }
    }

    /// Keeps the gate closed for `duration`.
    ///
    /// The hold is released even if the returned future is dropped mid-sleep.
    pub async fn cooldown(&self, duration: Duration) {
        let _hold = self.hold();
        tokio::time::sleep(duration).await;
    }
}

/// Hold on a [`BackoffGate`], released on drop.
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the hold is dropped"]
pub struct GateHold {
    gate: BackoffGate,
}

impl Drop for GateHold {
    fn drop(&mut self) {
        self.gate.open();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn test_open_gate_does_not_block() {
        let gate = BackoffGate::new();
        assert!(gate.is_open());
        gate.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_resume_after_cooldown() {
        let gate = BackoffGate::new();
        let started = Instant::now();

        let cooling = tokio::spawn({
            let gate = gate.clone();
            async move { gate.cooldown(Duration::from_secs(5)).await }
        });
        tokio::task::yield_now().await;
        assert!(!gate.is_open());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.wait().await;
                    Instant::now()
                })
            })
            .collect();

        for waiter in waiters {
            let resumed = waiter.await.unwrap();
            assert!(resumed - started >= Duration::from_secs(5));
        }
        cooling.await.unwrap();
        assert!(gate.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cooldowns_keep_gate_closed() {
        let gate = BackoffGate::new();
        let started = Instant::now();

        let short = tokio::spawn({
            let gate = gate.clone();
            async move { gate.cooldown(Duration::from_secs(1)).await }
        });
        let long = tokio::spawn({
            let gate = gate.clone();
            async move { gate.cooldown(Duration::from_secs(4)).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(gate.holds(), 2);

        short.await.unwrap();
        assert!(!gate.is_open());

        gate.wait().await;
        assert!(Instant::now() - started >= Duration::from_secs(4));
        long.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cooldown_releases_hold() {
        let gate = BackoffGate::new();
        let cooling = tokio::spawn({
            let gate = gate.clone();
            async move { gate.cooldown(Duration::from_secs(60)).await }
        });
        tokio::task::yield_now().await;
        assert!(!gate.is_open());

        cooling.abort();
        let _ = cooling.await;
        assert!(gate.is_open());
    }

    #[test]
    fn test_open_never_underflows() {
        let gate = BackoffGate::new();
        gate.open();
        assert!(gate.is_open());

        let hold = gate.hold();
        assert_eq!(gate.holds(), 1);
        drop(hold);
        assert!(gate.is_open());
    }
}
