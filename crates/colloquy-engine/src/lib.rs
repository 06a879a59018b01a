#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod batch;
mod driver;
mod executor;
mod gate;

pub mod metrics;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
mod backend;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod mock;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use backend::RemoteLlmBackend;
pub use batch::BatchEngine;
pub use colloquy_core::{
    BatchOutcome, Error, ErrorKind, LlmBackend, PromptSequence, PromptStep, RemoteLlmConfig,
    Result, SequenceOutcome,
};
pub use driver::{ConversationDriver, DriveResult};
pub use executor::{Completion, RequestExecutor, TurnFailure, backoff_delay};
pub use gate::{BackoffGate, GateHold};
pub use metrics::{BatchTelemetry, SequenceMetrics, StatusReporter, StatusSnapshot};
