//! JSON report written after a batch.

use std::path::Path;

use anyhow::Context;
use colloquy_core::{BatchOutcome, TokenUsage};
use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Per-sequence accounting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSummary {
    /// Whether every step produced a response.
    pub completed: bool,
    /// Money spent on the sequence.
    pub cost: f64,
    /// Tokens consumed by the sequence.
    pub usage: TokenUsage,
}

/// Batch report: the response matrix, total cost and accounting details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: Timestamp,
    pub elapsed_ms: i64,
    /// One response list per input sequence; empty for failed sequences.
    pub responses: Vec<Vec<String>>,
    pub total_cost: f64,
    pub completed: usize,
    pub failed: usize,
    pub usage: TokenUsage,
    pub sequences: Vec<SequenceSummary>,
}

/// Milliseconds in `duration`, saturating at the bounds of `i64`.
fn whole_millis(duration: SignedDuration) -> i64 {
    let millis = duration.as_millis();
    i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
}

impl From<&BatchOutcome> for BatchReport {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            batch_id: outcome.batch_id,
            started_at: outcome.started_at,
            elapsed_ms: whole_millis(outcome.elapsed()),
            responses: outcome.responses(),
            total_cost: outcome.total_cost,
            completed: outcome.completed(),
            failed: outcome.failed(),
            usage: outcome.usage(),
            sequences: outcome
                .sequences
                .iter()
                .map(|sequence| SequenceSummary {
                    completed: sequence.is_complete(),
                    cost: sequence.cost,
                    usage: sequence.usage,
                })
                .collect(),
        }
    }
}

impl BatchReport {
    /// Serializes the report.
    pub fn render(&self, pretty: bool) -> anyhow::Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.context("failed to serialize report")
    }

    /// Writes the report to `output`, or to stdout when `None`.
    pub async fn write(&self, output: Option<&Path>, pretty: bool) -> anyhow::Result<()> {
        let mut json = self.render(pretty)?;
        json.push('\n');

        match output {
            Some(path) => tokio::fs::write(path, json)
                .await
                .with_context(|| format!("failed to write {}", path.display())),
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(json.as_bytes()).await?;
                stdout.flush().await.context("failed to write report to stdout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use colloquy_core::SequenceOutcome;
    use serde_json::{Value, json};

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
                    cost: 0.0,
                    usage: TokenUsage::default(),
                },
            ],
            now,
            now,
        )
    }

    #[test]
    fn test_report_shape() {
        let report = BatchReport::from(&outcome());
        let value: Value = serde_json::from_str(&report.render(false).unwrap()).unwrap();

        assert_eq!(value["responses"], json!([["OK"], []]));
        assert_eq!(value["completed"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["usage"], json!({"input_tokens": 10, "output_tokens": 5}));
        assert_eq!(value["sequences"][1]["completed"], false);
        assert_eq!(value["elapsed_ms"], 0);
    }

    #[test]
    fn test_elapsed_millis_saturate() {
        assert_eq!(whole_millis(SignedDuration::from_millis(1_500)), 1_500);
        assert_eq!(whole_millis(SignedDuration::MAX), i64::MAX);
        assert_eq!(whole_millis(SignedDuration::MIN), i64::MIN);
    }

    #[test]
    fn test_pretty_rendering() {
        let report = BatchReport::from(&outcome());
        assert!(report.render(true).unwrap().contains('\n'));
        assert!(!report.render(false).unwrap().contains('\n'));
    }
}
