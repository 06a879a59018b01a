//! Multi-turn conversation state.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Prompt side.
    User,
    /// Model side.
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who authored the turn.
    pub role: Role,
    /// Text of the turn.
    pub content: String,
    /// When false, the outbound payload for this turn drops all prior history.
    pub with_memory: bool,
}

impl Turn {
    /// Creates a user turn.
    pub fn user(content: impl Into<String>, with_memory: bool) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            with_memory,
        }
    }

    /// Creates an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            with_memory: true,
        }
    }
}

/// Ordered turns of one conversation, alternating user/assistant starting with user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a user turn.
    ///
    /// # Panics
    ///
    /// Debug builds assert that the previous turn (if any) was an assistant turn.
    pub fn push_user(&mut self, content: impl Into<String>, with_memory: bool) {
        debug_assert!(self.turns.len() % 2 == 0, "user turns must follow assistant turns");
        self.turns.push(Turn::user(content, with_memory));
    }

    /// Appends an assistant turn.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        debug_assert!(self.turns.len() % 2 == 1, "assistant turns must follow user turns");
        self.turns.push(Turn::assistant(content));
    }

    /// Removes the trailing user turn if it has no answer yet.
    pub fn pop_pending(&mut self) -> Option<Turn> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => self.turns.pop(),
            _ => None,
        }
    }

    /// All turns, in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns true if no turn was recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Content of the most recent assistant turn.
    pub fn last_response(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::Assistant)
            .map(|turn| turn.content.as_str())
    }

    /// Turns that make up the outbound payload.
    ///
    /// History starts at the most recent turn marked `with_memory = false`; earlier
    /// turns are dropped. Without such a turn the whole history is sent.
    pub fn outbound_turns(&self) -> &[Turn] {
        let start = self
            .turns
            .iter()
            .rposition(|turn| !turn.with_memory)
            .unwrap_or(0);
        &self.turns[start..]
    }

    /// True if the conversation holds a full exchange for `steps` prompts.
    pub fn is_complete(&self, steps: usize) -> bool {
        self.turns.len() == steps * 2
    }

    /// Contents of every assistant turn, in order.
    pub fn responses(&self) -> Vec<String> {
        self.turns
            .iter()
            .filter(|turn| turn.role == Role::Assistant)
            .map(|turn| turn.content.clone())
            .collect()
    }

    /// Consumes the conversation and returns its turns.
    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}
