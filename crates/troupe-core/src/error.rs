use thiserror::Error;
use troupe_schema::ActorTurn;

/// Failures of one pipeline run.
///
/// A provider reply naming an unknown handle is not represented here: it is
/// filtered out and logged, never surfaced as an error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("provider reply is not decodable as JSON")]
    Parse { raw: String },

    #[error("provider reply has an unexpected shape: {reason}")]
    Validation { reason: String },

    #[error("completion provider failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("conversation {conversation_id} has {len} turns, ceiling is {ceiling}")]
    ConversationOverflow {
        conversation_id: String,
        len: usize,
        ceiling: usize,
    },

    #[error("storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("dispatch failed: {0:#}")]
    Dispatch(anyhow::Error),
}

impl PipelineError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Errors that end the run quietly instead of reaching the top-level handler.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::Validation { .. } | Self::ConversationOverflow { .. }
        )
    }
}

/// What happened to one inbound event.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Bot-originated or non-text event.
    Ignored,
    /// Another run held the gate; the event was dropped.
    Busy,
    /// The conversation was cleared by `/reset`.
    Reset,
    /// The reply was committed and dispatched. `turns` may be empty when
    /// every handle in the reply was unknown.
    Replied { turns: Vec<ActorTurn> },
    /// The run aborted without mutating state.
    Rejected(PipelineError),
}
