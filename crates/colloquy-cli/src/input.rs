//! Prompt sequence input format.
//!
//! The input is a JSON array of sequences; each step is either a literal string or
//! a `{"template": "..."}` object whose `{response}` placeholder receives the
//! previous assistant response:
//!
//! ```json
//! [
//!     ["Write a short poem about the sea", {"template": "Give this poem a title: {response}"}],
//!     ["Hello"]
//! ]
//! ```

use std::path::Path;

use anyhow::Context;
use colloquy_core::{PromptSequence, PromptStep};
use serde::Deserialize;

/// One step as written in the input file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Literal(String),
    Template {
        template: String,
    },
}

impl From<RawStep> for PromptStep {
    fn from(raw: RawStep) -> Self {
        match raw {
            RawStep::Literal(text) => PromptStep::literal(text),
            RawStep::Template { template } => PromptStep::template(template),
        }
    }
}

/// Parses prompt sequences from JSON text.
pub fn parse_sequences(json: &str) -> anyhow::Result<Vec<PromptSequence>> {
    let raw: Vec<Vec<RawStep>> =
        serde_json::from_str(json).context("input must be a JSON array of prompt sequences")?;

    raw.into_iter()
        .enumerate()
        .map(|(index, steps)| {
            PromptSequence::new(steps.into_iter().map(PromptStep::from))
                .with_context(|| format!("invalid prompt sequence at index {index}"))
        })
        .collect()
}

/// Reads and parses the prompt sequences stored at `path`.
pub async fn read_sequences(path: &Path) -> anyhow::Result<Vec<PromptSequence>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_sequences(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals_and_templates() {
        let sequences = parse_sequences(
            r#"[
                ["Write a poem", {"template": "Title for: {response}"}],
                ["Hello"]
            ]"#,
        )
        .unwrap();

        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].len(), 2);
        assert_eq!(sequences[1].len(), 1);

        let steps = sequences[0].steps();
        assert!(!steps[0].is_generator());
        assert!(steps[1].is_generator());
        assert_eq!(steps[1].render(Some("waves")).unwrap(), "Title for: waves");
    }

    #[test]
    fn test_empty_input_is_an_empty_batch() {
        assert!(parse_sequences("[]").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_invalid_sequences() {
        let error = parse_sequences(r#"[["ok"], []]"#).unwrap_err();
        assert!(error.to_string().contains("index 1"));

        assert!(parse_sequences(r#"[[{"template": "{response}"}]]"#).is_err());
        assert!(parse_sequences(r#"[[42]]"#).is_err());
        assert!(parse_sequences(r#"{"sequences": []}"#).is_err());
    }
}
