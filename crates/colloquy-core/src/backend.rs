//! Abstract completion backend and batch results.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::completion::TokenUsage;
use crate::prompt::PromptSequence;

/// Result of one prompt sequence within a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceOutcome {
    /// Assistant responses in order; empty when the sequence did not complete.
    pub responses: Vec<String>,
    /// Money spent on this sequence, including turns of a failed sequence.
    pub cost: f64,
    /// Tokens consumed by this sequence.
    pub usage: TokenUsage,
}

impl SequenceOutcome {
    /// True when every step produced a response.
    pub fn is_complete(&self) -> bool {
        !self.responses.is_empty()
    }
}

/// Aggregate result of one batch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Identifier used in every log line of this batch.
    pub batch_id: Uuid,
    /// Per-sequence outcomes, in submission order.
    pub sequences: Vec<SequenceOutcome>,
    /// Sum of all per-sequence costs.
    pub total_cost: f64,
    /// When the batch started.
    pub started_at: Timestamp,
    /// When the batch finished.
    pub finished_at: Timestamp,
}

impl BatchOutcome {
    /// Builds an outcome, deriving the total cost from the sequences.
    pub fn new(
        batch_id: Uuid,
        sequences: Vec<SequenceOutcome>,
        started_at: Timestamp,
        finished_at: Timestamp,
    ) -> Self {
        let total_cost = sequences.iter().map(|s| s.cost).sum();
        Self {
            batch_id,
            sequences,
            total_cost,
            started_at,
            finished_at,
        }
    }

    /// The response matrix: one list per sequence, empty for failed sequences.
    pub fn responses(&self) -> Vec<Vec<String>> {
        self.sequences
            .iter()
            .map(|sequence| sequence.responses.clone())
            .collect()
    }

    /// Consumes the outcome into the response matrix and the total cost.
    pub fn into_parts(self) -> (Vec<Vec<String>>, f64) {
        let responses = self
            .sequences
            .into_iter()
            .map(|sequence| sequence.responses)
            .collect();
        (responses, self.total_cost)
    }

    /// Number of sequences that produced a full response list.
    pub fn completed(&self) -> usize {
        self.sequences.iter().filter(|s| s.is_complete()).count()
    }

    /// Number of sequences that failed.
    pub fn failed(&self) -> usize {
        self.sequences.len() - self.completed()
    }

    /// Tokens consumed by the whole batch.
    pub fn usage(&self) -> TokenUsage {
        self.sequences.iter().map(|s| s.usage).sum()
    }

    /// Wall-clock duration of the batch.
    pub fn elapsed(&self) -> SignedDuration {
        self.finished_at.duration_since(self.started_at)
    }
}

/// A completion backend able to run batches of prompt sequences.
///
/// Remote backends acquire pooled connections in `setup` and release them in
/// `teardown`. Calling `complete_batch` outside that window is a configuration
/// error.
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Acquires the resources needed to serve batches.
    async fn setup(&mut self) -> Result<()>;

    /// Runs one batch. Individual sequence failures show up as empty response lists.
    async fn complete_batch(&self, sequences: &[PromptSequence]) -> Result<BatchOutcome>;

    /// Releases the resources acquired by `setup`.
    async fn teardown(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> BatchOutcome {
        let now = Timestamp::now();
        BatchOutcome::new(
            Uuid::now_v7(),
            vec![
                SequenceOutcome {
                    responses: vec!["OK".into()],
                    cost: 0.000_015,
                    usage: TokenUsage::new(10, 5),
                },
                SequenceOutcome {
                    responses: Vec::new(),
                    cost: 0.000_01,
                    usage: TokenUsage::new(10, 0),
                },
            ],
            now,
            now,
        )
    }

    #[test]
    fn test_counts_and_totals() {
        let outcome = outcome();
        assert_eq!(outcome.completed(), 1);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.usage(), TokenUsage::new(20, 5));
        assert!((outcome.total_cost - 0.000_025).abs() < 1e-12);
    }

    #[test]
    fn test_into_parts() {
        let (responses, total_cost) = outcome().into_parts();
        assert_eq!(responses, vec![vec!["OK".to_owned()], Vec::new()]);
        assert!(total_cost > 0.0);
    }
}
