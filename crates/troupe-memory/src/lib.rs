pub mod migrations;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use troupe_schema::{CompletionIntent, Turn};
use uuid::Uuid;

pub use store::SqliteStore;

/// Append-only turn log per conversation.
///
/// Implementations do no locking of their own; callers guarantee a single
/// writer at a time.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Turns in append order. Unknown ids yield an empty list.
    async fn fetch(&self, conversation_id: &str) -> Result<Vec<Turn>>;

    async fn append(&self, conversation_id: &str, turn: Turn) -> Result<()> {
        self.append_many(conversation_id, vec![turn]).await
    }

    /// Append all `turns` atomically, creating the conversation on first use.
    async fn append_many(&self, conversation_id: &str, turns: Vec<Turn>) -> Result<()>;

    async fn reset(&self, conversation_id: &str) -> Result<()>;

    async fn turn_count(&self, conversation_id: &str) -> Result<usize>;
}

/// Audit trail of completion attempts. Independent of conversation resets.
#[async_trait]
pub trait IntentLog: Send + Sync {
    async fn record_intent(&self, intent: &CompletionIntent) -> Result<()>;

    /// Move an `intent` record to `done`. Fails if the record is missing or
    /// already terminal.
    async fn mark_done(
        &self,
        id: Uuid,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    ) -> Result<()>;

    /// Move an `intent` record to `error`. Same preconditions as `mark_done`.
    async fn mark_error(&self, id: Uuid, error: &str) -> Result<()>;

    async fn get_intent(&self, id: Uuid) -> Result<Option<CompletionIntent>>;

    /// Newest first.
    async fn list_intents(
        &self,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompletionIntent>>;
}
