//! Wire shapes for the generic chat completion request and response.
//!
//! Requests look like:
//!
//! ```json
//! {"messages": [{"role": "user", "content": "..."}], "model": "...", "provider": "..."}
//! ```
//!
//! and successful responses are expected to carry at least:
//!
//! ```json
//! {"choices": [{"message": {"content": "..."}}],
//!  "usage": {"prompt_tokens": 10, "completion_tokens": 5}}
//! ```

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::InferenceParams;
use crate::conversation::{Role, Turn};
use crate::{Error, Result};

/// Input and output token counts reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the completion.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates a new usage record.
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total number of tokens.
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.input_tokens + rhs.input_tokens,
            self.output_tokens + rhs.output_tokens,
        )
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// One typed part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text part.
    Text {
        /// The text.
        text: String,
    },
}

/// Message content: either a plain string or an array of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multimodal content parts.
    Parts(Vec<ContentPart>),
}

/// A message as sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: Role,
    /// What was said.
    pub content: MessageContent,
}

impl ChatMessage {
    /// Converts a conversation turn into its outbound message.
    ///
    /// With `multimodal` set, user turns are wrapped into a single text part.
    pub fn from_turn(turn: &Turn, multimodal: bool) -> Self {
        let content = match turn.role {
            Role::User if multimodal => MessageContent::Parts(vec![ContentPart::Text {
                text: turn.content.clone(),
            }]),
            _ => MessageContent::Text(turn.content.clone()),
        };

        Self {
            role: turn.role,
            content,
        }
    }
}

/// Builds the JSON body for a chat completion request.
///
/// Keys are inserted in order: `messages`, then every inference parameter, then
/// `provider` when present.
pub fn build_request_body<'a>(
    turns: impl IntoIterator<Item = &'a Turn>,
    params: &InferenceParams,
    provider: Option<&str>,
    multimodal: bool,
) -> Result<Value> {
    let messages = turns
        .into_iter()
        .map(|turn| ChatMessage::from_turn(turn, multimodal))
        .collect::<Vec<_>>();

    let mut body = Map::new();
    body.insert("messages".to_owned(), serde_json::to_value(messages)?);
    for (key, value) in params.iter() {
        body.insert(key.clone(), value.clone());
    }
    if let Some(provider) = provider {
        body.insert("provider".to_owned(), Value::from(provider));
    }

    Ok(Value::Object(body))
}

/// Successful chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    /// Generated choices; only the first is used.
    pub choices: Vec<Choice>,
    /// Token accounting.
    pub usage: UsageBlock,
}

/// One generated choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// The assistant message.
    pub message: ResponseMessage,
}

/// Assistant message inside a choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// Text content. Providers send `null` when nothing was generated.
    pub content: Option<String>,
}

/// Usage block of a completion response.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UsageBlock {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
}

impl ChatCompletionResponse {
    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Returns the content of the first choice.
    pub fn content(&self) -> Result<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| Error::external_error().with_message("response has no content"))
    }

    /// Returns the token usage.
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.usage.prompt_tokens, self.usage.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_body_layout() {
        let turns = vec![Turn::user("Hello", true)];
        let params = InferenceParams::new()
            .with("model", "google/gemma-2-9b-it")
            .with("temperature", 0.5);

        let body = build_request_body(&turns, &params, Some("deepinfra"), false).unwrap();

        assert_eq!(
            body,
            json!({
                "messages": [{"role": "user", "content": "Hello"}],
                "model": "google/gemma-2-9b-it",
                "temperature": 0.5,
                "provider": "deepinfra",
            })
        );
    }

    #[test]
    fn test_request_body_without_provider() {
        let turns = vec![Turn::user("Hi", true)];
        let body = build_request_body(&turns, &InferenceParams::new(), None, false).unwrap();
        assert!(body.get("provider").is_none());
    }

    #[test]
    fn test_multimodal_wraps_user_turns_only() {
        let turns = vec![
            Turn::user("Describe", true),
            Turn::assistant("A cat"),
            Turn::user("More", true),
        ];
        let body = build_request_body(&turns, &InferenceParams::new(), None, true).unwrap();

        assert_eq!(
            body["messages"],
            json!([
                {"role": "user", "content": [{"type": "text", "text": "Describe"}]},
                {"role": "assistant", "content": "A cat"},
                {"role": "user", "content": [{"type": "text", "text": "More"}]},
            ])
        );
    }

    #[test]
    fn test_parse_response() {
        let body = br#"{
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "OK"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;

        let response = ChatCompletionResponse::from_slice(body).unwrap();
        assert_eq!(response.content().unwrap(), "OK");
        assert_eq!(response.usage(), TokenUsage::new(10, 5));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let body = br#"{"choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 0}}"#;
        let response = ChatCompletionResponse::from_slice(body).unwrap();
        assert!(response.content().is_err());

        assert!(ChatCompletionResponse::from_slice(br#"{"error": "boom"}"#).is_err());
    }

    #[test]
    fn test_token_usage_sum() {
        let total: TokenUsage = [TokenUsage::new(1, 2), TokenUsage::new(3, 4)]
            .into_iter()
            .sum();
        assert_eq!(total, TokenUsage::new(4, 6));
        assert_eq!(total.total(), 10);
    }
}
