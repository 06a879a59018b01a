//! Conversation driver: expands one prompt sequence into a full conversation.

use colloquy_core::{Conversation, PromptSequence, SequenceOutcome, TokenUsage};

use crate::executor::RequestExecutor;

/// Tracing target for conversation driving.
pub const TRACING_TARGET: &str = "colloquy_engine::driver";

/// Conversation produced by one driver run.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveResult {
    /// Turns accumulated; incomplete if a turn failed.
    pub conversation: Conversation,
    /// Money spent, including turns before a failure.
    pub cost: f64,
    /// Tokens consumed by successful turns.
    pub usage: TokenUsage,
    /// Number of steps in the driven sequence.
    pub steps: usize,
}

impl DriveResult {
    /// True if every step produced an assistant turn.
    pub fn is_complete(&self) -> bool {
        self.conversation.is_complete(self.steps)
    }

    /// Maps the run to its batch outcome: responses only for complete runs.
    pub fn into_outcome(self) -> SequenceOutcome {
        let responses = if self.is_complete() {
            self.conversation.responses()
        } else {
            Vec::new()
        };

        SequenceOutcome {
            responses,
            cost: self.cost,
            usage: self.usage,
        }
    }
}

/// Drives conversations turn by turn through a [`RequestExecutor`].
#[derive(Debug, Clone, Copy)]
pub struct ConversationDriver<'a> {
    executor: &'a RequestExecutor,
}

impl<'a> ConversationDriver<'a> {
    /// Creates a driver using `executor` for every turn.
    pub fn new(executor: &'a RequestExecutor) -> Self {
        Self { executor }
    }

    /// Runs `sequence`, stopping at the first failed turn.
    ///
    /// Generator steps receive the previous assistant response and their user turn
    /// is sent without prior history.
    pub async fn run(&self, sequence: &PromptSequence, sequence_index: usize) -> DriveResult {
        let telemetry = self.executor.telemetry();
        telemetry.start_sequence(sequence_index);

        let mut conversation = Conversation::new();
        let mut cost = 0.0;
        let mut usage = TokenUsage::default();

        for (step_index, step) in sequence.iter().enumerate() {
            let prompt = match step.render(conversation.last_response()) {
                Ok(prompt) => prompt,
                Err(err) => {
                    tracing::error!(
                        target: TRACING_TARGET,
                        sequence_index,
                        step_index,
                        error = %err,
                        "Cannot render prompt step"
                    );
                    break;
                }
            };

            conversation.push_user(prompt, !step.is_generator());
            let result = self.executor.execute(&conversation, sequence_index).await;
            telemetry.turn_issued();

            let Ok(completion) = result else {
                conversation.pop_pending();
                tracing::debug!(
                    target: TRACING_TARGET,
                    sequence_index,
                    step_index,
                    "Conversation aborted"
                );
                break;
            };

            conversation.push_assistant(completion.content);
            telemetry.record_usage(sequence_index, completion.usage);
            usage += completion.usage;
            cost += completion.cost;
        }

        let result = DriveResult {
            conversation,
            cost,
            usage,
            steps: sequence.len(),
        };

        if result.is_complete() {
            telemetry.finish_sequence(sequence_index);
        }

        result
    }
}
