use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use troupe_memory::{HistoryStore, IntentLog};
use troupe_provider::LlmProvider;
use troupe_schema::{ActorTurn, InboundEvent, OutboundMessage, Turn, UserTurn};
use uuid::Uuid;

use crate::commands::{parse_command, Command};
use crate::config::TroupeConfig;
use crate::error::{PipelineError, PipelineOutcome};
use crate::filter::filter_known_actors;
use crate::gate::ConcurrencyGate;
use crate::gateway::CompletionGateway;
use crate::parser::parse_response;
use crate::prompt::PromptAssembler;
use crate::registry::{ActorRegistry, ParticipantRegistry};

pub const NO_THOUGHTS: &str = "[no thoughts]";
pub const NO_ANSWER: &str = "[no answer given]";

/// Outbound side of a chat transport.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

pub fn thoughts_line(turn: &ActorTurn) -> String {
    let thoughts = turn.thoughts.join(",");
    if thoughts.is_empty() {
        format!("{} thoughts: {NO_THOUGHTS}", turn.handle)
    } else {
        format!("{} thoughts: {thoughts}", turn.handle)
    }
}

pub fn answer_line(turn: &ActorTurn) -> String {
    if turn.answer.is_empty() {
        format!("{}: {NO_ANSWER}", turn.handle)
    } else {
        format!("{}: {}", turn.handle, turn.answer)
    }
}

pub struct Orchestrator {
    gate: ConcurrencyGate,
    history: Arc<dyn HistoryStore>,
    gateway: CompletionGateway,
    assembler: PromptAssembler,
    actors: ActorRegistry,
    participants: ParticipantRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    turn_ceiling: usize,
    reset_reply: String,
}

impl Orchestrator {
    pub fn new(
        config: &TroupeConfig,
        provider: Arc<dyn LlmProvider>,
        history: Arc<dyn HistoryStore>,
        audit: Arc<dyn IntentLog>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let actors = ActorRegistry::from_config(config);
        let participants = ParticipantRegistry::from_config(config);
        let assembler = PromptAssembler::new(&actors, &participants, &config.main.model);
        Self {
            gate: ConcurrencyGate::new(),
            history,
            gateway: CompletionGateway::new(provider, audit),
            assembler,
            actors,
            participants,
            dispatcher,
            turn_ceiling: config.main.runtime.turn_ceiling,
            reset_reply: config.main.commands.reset_reply.clone(),
        }
    }

    pub fn with_gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Run one inbound event through the pipeline.
    ///
    /// Parse, validation and overflow failures end as
    /// `PipelineOutcome::Rejected`. Provider, storage and dispatch failures
    /// are returned as errors. The gate is released on every path.
    pub async fn handle_inbound(
        &self,
        event: InboundEvent,
    ) -> Result<PipelineOutcome, PipelineError> {
        if event.is_bot_originated {
            tracing::debug!(
                conversation_id = %event.conversation_id,
                "skipping bot-originated message"
            );
            return Ok(PipelineOutcome::Ignored);
        }
        if !event.has_text || event.text.trim().is_empty() {
            tracing::debug!(
                conversation_id = %event.conversation_id,
                "skipping non-text message"
            );
            return Ok(PipelineOutcome::Ignored);
        }

        let Some(_guard) = self.gate.try_acquire() else {
            tracing::debug!(
                conversation_id = %event.conversation_id,
                sender = %event.sender_handle,
                "pipeline busy, dropping message"
            );
            return Ok(PipelineOutcome::Busy);
        };

        if let Some(Command::Reset) = parse_command(&event.text) {
            return self.reset(&event).await;
        }

        match self.run(&event).await {
            Err(err) if err.is_local() => {
                match &err {
                    PipelineError::Parse { raw } => tracing::warn!(
                        conversation_id = %event.conversation_id,
                        raw = %raw,
                        "unparseable provider reply"
                    ),
                    PipelineError::ConversationOverflow { .. } => tracing::warn!(
                        conversation_id = %event.conversation_id,
                        "{err}, likely abuse"
                    ),
                    _ => tracing::warn!(
                        conversation_id = %event.conversation_id,
                        "rejected provider reply: {err}"
                    ),
                }
                Ok(PipelineOutcome::Rejected(err))
            }
            other => other,
        }
    }

    async fn reset(&self, event: &InboundEvent) -> Result<PipelineOutcome, PipelineError> {
        self.history
            .reset(&event.conversation_id)
            .await
            .map_err(PipelineError::Storage)?;
        tracing::info!(conversation_id = %event.conversation_id, "conversation reset");

        self.dispatch(event.trace_id, &event.conversation_id, &self.reset_reply)
            .await?;
        Ok(PipelineOutcome::Reset)
    }

    async fn run(&self, event: &InboundEvent) -> Result<PipelineOutcome, PipelineError> {
        let conversation_id = event.conversation_id.as_str();
        let history = self
            .history
            .fetch(conversation_id)
            .await
            .map_err(PipelineError::Storage)?;
        if history.len() > self.turn_ceiling {
            return Err(PipelineError::ConversationOverflow {
                conversation_id: conversation_id.to_string(),
                len: history.len(),
                ceiling: self.turn_ceiling,
            });
        }

        if !self.participants.contains(&event.sender_handle) {
            tracing::debug!(
                conversation_id,
                sender = %event.sender_handle,
                "sender is not a configured participant"
            );
        }
        let user_turn = UserTurn {
            handle: event.sender_handle.clone(),
            text: event.text.clone(),
        };

        let request = self.assembler.build(&history, &user_turn);
        let response = self.gateway.complete(conversation_id, request).await?;
        let parsed = parse_response(&response.text)?;

        let (turns, dropped) = filter_known_actors(parsed.into_turns(), &self.actors);
        if !dropped.is_empty() {
            tracing::debug!(conversation_id, ?dropped, "filtered unknown handles");
        }

        let mut batch = Vec::with_capacity(turns.len() + 1);
        batch.push(Turn::User(user_turn));
        batch.extend(turns.iter().cloned().map(Turn::Actor));
        self.history
            .append_many(conversation_id, batch)
            .await
            .map_err(PipelineError::Storage)?;
        tracing::info!(
            conversation_id,
            actors = turns.len(),
            "committed user turn and replies"
        );

        for turn in &turns {
            self.dispatch(event.trace_id, conversation_id, &thoughts_line(turn))
                .await?;
            self.dispatch(event.trace_id, conversation_id, &answer_line(turn))
                .await?;
        }

        Ok(PipelineOutcome::Replied { turns })
    }

    async fn dispatch(
        &self,
        trace_id: Uuid,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), PipelineError> {
        self.dispatcher
            .send(OutboundMessage::new(trace_id, conversation_id, text))
            .await
            .map_err(PipelineError::Dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_use_placeholders_when_empty() {
        let empty = ActorTurn::new("Josh", vec![], "");
        assert_eq!(thoughts_line(&empty), "Josh thoughts: [no thoughts]");
        assert_eq!(answer_line(&empty), "Josh: [no answer given]");
    }

    #[test]
    fn thoughts_are_joined_with_commas() {
        let turn = ActorTurn::new("Mary", vec!["a".into(), "b c".into()], "hello");
        assert_eq!(thoughts_line(&turn), "Mary thoughts: a,b c");
        assert_eq!(answer_line(&turn), "Mary: hello");
    }
}
