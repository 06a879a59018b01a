//! Prompt sequences: the input of one independent multi-turn exchange.

use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Placeholder substituted by [`PromptStep::template`].
pub const RESPONSE_PLACEHOLDER: &str = "{response}";

/// Function mapping the previous assistant response to the next user prompt.
pub type PromptFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One step of a prompt sequence.
#[derive(Clone)]
pub enum PromptStep {
    /// Fixed prompt text, sent with the full conversation history.
    Literal(String),
    /// Prompt derived from the previous assistant response, sent without history.
    Generator(PromptFn),
}

impl PromptStep {
    /// Creates a literal step.
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Creates a generator step from a function of the previous response.
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::Generator(Arc::new(f))
    }

    /// Creates a generator step that substitutes `{response}` in `template`.
    pub fn template(template: impl Into<String>) -> Self {
        let template = template.into();
        Self::generator(move |response| template.replace(RESPONSE_PLACEHOLDER, response))
    }

    /// Returns true for generator steps.
    pub fn is_generator(&self) -> bool {
        matches!(self, Self::Generator(_))
    }

    /// Produces the user-turn text for this step.
    ///
    /// Generator steps receive `previous`, the last assistant response. A generator
    /// without a previous response is rejected.
    pub fn render(&self, previous: Option<&str>) -> Result<String> {
        match self {
            Self::Literal(text) => Ok(text.clone()),
            Self::Generator(f) => previous.map(|response| f(response)).ok_or_else(|| {
                Error::invalid_input().with_message("generator step has no previous response")
            }),
        }
    }
}

impl fmt::Debug for PromptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

impl From<&str> for PromptStep {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

impl From<String> for PromptStep {
    fn from(text: String) -> Self {
        Self::Literal(text)
    }
}

/// Ordered, non-empty list of prompt steps. Immutable once built.
#[derive(Debug, Clone)]
pub struct PromptSequence {
    steps: Arc<[PromptStep]>,
}

impl PromptSequence {
    /// Creates a sequence from its steps.
    ///
    /// # Errors
    ///
    /// Fails when `steps` is empty or starts with a generator step.
    pub fn new(steps: impl IntoIterator<Item = PromptStep>) -> Result<Self> {
        let steps: Arc<[PromptStep]> = steps.into_iter().collect();

        match steps.first() {
            None => Err(Error::invalid_input().with_message("prompt sequence is empty")),
            Some(step) if step.is_generator() => Err(Error::invalid_input()
                .with_message("prompt sequence cannot start with a generator step")),
            Some(_) => Ok(Self { steps }),
        }
    }

    /// Creates a sequence of literal prompts.
    pub fn literals<I, S>(prompts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(prompts.into_iter().map(|p| PromptStep::Literal(p.into())))
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterates over the steps.
    pub fn iter(&self) -> impl Iterator<Item = &PromptStep> {
        self.steps.iter()
    }

    /// Returns the steps as a slice.
    pub fn steps(&self) -> &[PromptStep] {
        &self.steps
    }
}

impl<'a> IntoIterator for &'a PromptSequence {
    type IntoIter = std::slice::Iter<'a, PromptStep>;
    type Item = &'a PromptStep;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
