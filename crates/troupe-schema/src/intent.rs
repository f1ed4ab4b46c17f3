use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one completion attempt: `Intent` is written before the call,
/// then exactly one of `Done` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Intent,
    Done,
    Error,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Intent => "intent",
            IntentState::Done => "done",
            IntentState::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "intent" => Ok(IntentState::Intent),
            "done" => Ok(IntentState::Done),
            "error" => Ok(IntentState::Error),
            other => Err(anyhow!("unknown intent state: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentState::Intent)
    }
}

impl std::fmt::Display for IntentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionIntent {
    pub id: Uuid,
    pub conversation_id: String,
    pub state: IntentState,
    pub credential_fingerprint: String,
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CompletionIntent {
    pub fn new(
        conversation_id: impl Into<String>,
        credential_fingerprint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            state: IntentState::Intent,
            credential_fingerprint: credential_fingerprint.into(),
            model: model.into(),
            prompt_tokens: None,
            completion_tokens: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_string_roundtrip() {
        for state in [IntentState::Intent, IntentState::Done, IntentState::Error] {
            assert_eq!(IntentState::parse(state.as_str()).unwrap(), state);
        }
        assert!(IntentState::parse("pending").is_err());
    }

    #[test]
    fn only_intent_is_non_terminal() {
        assert!(!IntentState::Intent.is_terminal());
        assert!(IntentState::Done.is_terminal());
        assert!(IntentState::Error.is_terminal());
    }

    #[test]
    fn new_intent_starts_in_intent_state() {
        let intent = CompletionIntent::new("chat:1", "abcd", "gpt-3.5-turbo");
        assert_eq!(intent.state, IntentState::Intent);
        assert!(intent.prompt_tokens.is_none());
        assert!(intent.completion_tokens.is_none());
        assert_eq!(intent.created_at, intent.updated_at);
    }
}
