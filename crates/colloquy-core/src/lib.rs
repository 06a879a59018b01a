#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod error;

pub mod backend;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod credentials;
pub mod prompt;
pub mod transport;

pub use backend::{BatchOutcome, LlmBackend, SequenceOutcome};
pub use completion::{ChatCompletionResponse, ChatMessage, TokenUsage, build_request_body};
pub use config::{AttemptBudget, InferenceParams, RemoteLlmConfig};
pub use conversation::{Conversation, Role, Turn};
pub use credentials::{KeyResolver, StaticKeyResolver};
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use prompt::{PromptFn, PromptSequence, PromptStep};
pub use transport::{ChatRequest, ChatTransport, TransportResponse};
