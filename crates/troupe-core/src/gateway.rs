//! Provider calls with an audit trail.
//!
//! Each call is preceded by an `intent` record and followed by exactly one
//! terminal update. A failing terminal update only degrades the audit: it is
//! logged and never replaces the outcome of the call itself.

use std::sync::Arc;

use troupe_memory::IntentLog;
use troupe_provider::{ChatRequest, ChatResponse, LlmProvider};
use troupe_schema::CompletionIntent;

use crate::error::PipelineError;

#[derive(Clone)]
pub struct CompletionGateway {
    provider: Arc<dyn LlmProvider>,
    audit: Arc<dyn IntentLog>,
}

impl CompletionGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, audit: Arc<dyn IntentLog>) -> Self {
        Self { provider, audit }
    }

    /// Call the provider under an audit record.
    ///
    /// If `done` cannot be written after a successful call the record is
    /// moved to `error` instead and the response is still returned. The
    /// record stays at `intent` only when the audit store rejects both
    /// terminal updates.
    pub async fn complete(
        &self,
        conversation_id: &str,
        request: ChatRequest,
    ) -> Result<ChatResponse, PipelineError> {
        let intent = CompletionIntent::new(
            conversation_id,
            self.provider.fingerprint(),
            request.model.clone(),
        );
        self.audit
            .record_intent(&intent)
            .await
            .map_err(PipelineError::Storage)?;

        tracing::debug!(
            intent_id = %intent.id,
            conversation_id,
            model = %intent.model,
            messages = request.messages.len(),
            "calling completion provider"
        );

        match self.provider.chat(request).await {
            Ok(response) => {
                if let Err(e) = self
                    .audit
                    .mark_done(intent.id, response.prompt_tokens, response.completion_tokens)
                    .await
                {
                    tracing::error!(intent_id = %intent.id, "failed to mark intent done: {e:#}");
                    let note = format!("completion succeeded but recording it failed: {e:#}");
                    if let Err(e) = self.audit.mark_error(intent.id, &note).await {
                        tracing::error!(intent_id = %intent.id, "failed to mark intent error: {e:#}");
                    }
                }
                tracing::info!(
                    intent_id = %intent.id,
                    conversation_id,
                    prompt_tokens = ?response.prompt_tokens,
                    completion_tokens = ?response.completion_tokens,
                    "completion finished"
                );
                Ok(response)
            }
            Err(call_error) => {
                if let Err(e) = self
                    .audit
                    .mark_error(intent.id, &format!("{call_error:#}"))
                    .await
                {
                    tracing::error!(intent_id = %intent.id, "failed to mark intent error: {e:#}");
                }
                tracing::error!(
                    intent_id = %intent.id,
                    conversation_id,
                    "completion failed: {call_error:#}"
                );
                Err(PipelineError::Provider(call_error))
            }
        }
    }
}
