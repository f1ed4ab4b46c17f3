use std::sync::Arc;

use anyhow::anyhow;
use teloxide::prelude::*;
use teloxide::types::{Message, User};
use troupe_core::{Orchestrator, PipelineOutcome};
use troupe_schema::{InboundEvent, OutboundMessage};

pub const CHANNEL_TYPE: &str = "telegram";

pub struct TelegramAdapter {
    connector_id: String,
}

impl TelegramAdapter {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
        }
    }

    /// Normalize a Telegram message. `text` is `None` for stickers, photos
    /// and other non-text updates.
    pub fn to_inbound(
        &self,
        chat_id: i64,
        sender_handle: &str,
        text: Option<&str>,
        is_bot: bool,
    ) -> InboundEvent {
        let mut event = InboundEvent::text(
            CHANNEL_TYPE,
            &self.connector_id,
            format!("chat:{chat_id}"),
            sender_handle,
            text.unwrap_or_default(),
        );
        event.has_text = text.is_some_and(|t| !t.is_empty());
        event.is_bot_originated = is_bot;
        event
    }

    pub fn from_message(&self, msg: &Message) -> InboundEvent {
        let sender = msg.from.as_ref();
        self.to_inbound(
            msg.chat.id.0,
            &sender_handle(sender),
            msg.text(),
            sender.is_some_and(|user| user.is_bot),
        )
    }
}

/// Display handle of a Telegram user: the username when set, else the first
/// name.
pub fn sender_handle(user: Option<&User>) -> String {
    match user {
        Some(user) => handle_from_parts(user.username.as_deref(), &user.first_name),
        None => "unknown".to_string(),
    }
}

fn handle_from_parts(username: Option<&str>, first_name: &str) -> String {
    match username {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if !first_name.is_empty() => first_name.to_string(),
        _ => "unknown".to_string(),
    }
}

fn parse_chat_id(conversation_id: &str) -> Option<i64> {
    let parts: Vec<&str> = conversation_id.split(':').collect();
    if parts.len() >= 2 && parts[0] == "chat" {
        // group chats have negative ids
        parts[1..].join(":").parse().ok()
    } else {
        None
    }
}

/// Sends pipeline output to Telegram chats.
#[derive(Clone)]
pub struct TelegramDispatcher {
    bot: Bot,
}

impl TelegramDispatcher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait::async_trait]
impl troupe_core::Dispatcher for TelegramDispatcher {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let chat_id = parse_chat_id(&message.conversation_id).ok_or_else(|| {
            anyhow!(
                "not a telegram conversation id: {}",
                message.conversation_id
            )
        })?;
        self.bot.send_message(ChatId(chat_id), message.text).await?;
        Ok(())
    }
}

pub struct TelegramBot {
    bot: Bot,
    connector_id: String,
    orchestrator: Arc<Orchestrator>,
}

impl TelegramBot {
    pub fn new(bot: Bot, connector_id: String, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            bot,
            connector_id,
            orchestrator,
        }
    }

    pub async fn run_impl(self) -> anyhow::Result<()> {
        let adapter = Arc::new(TelegramAdapter::new(&self.connector_id));
        let orchestrator = self.orchestrator;

        let handler = Update::filter_message().endpoint(move |msg: Message| {
            let adapter = adapter.clone();
            let orchestrator = orchestrator.clone();

            async move {
                let inbound = adapter.from_message(&msg);

                // Handled off the dispatcher: a busy pipeline drops events, never queues them.
                tokio::spawn(async move {
                    let conversation_id = inbound.conversation_id.clone();
                    match orchestrator.handle_inbound(inbound).await {
                        Ok(PipelineOutcome::Replied { turns }) => {
                            tracing::debug!(%conversation_id, actors = turns.len(), "reply sent");
                        }
                        Ok(outcome) => {
                            tracing::debug!(%conversation_id, ?outcome, "message handled");
                        }
                        Err(err) => {
                            tracing::error!(%conversation_id, "pipeline error: {err}");
                        }
                    }
                });

                Ok::<(), teloxide::RequestError>(())
            }
        });

        tracing::info!(connector_id = %self.connector_id, "telegram bot starting");
        Dispatcher::builder(self.bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::ChannelBot for TelegramBot {
    fn channel_type(&self) -> &str {
        CHANNEL_TYPE
    }

    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    async fn run(self: Box<Self>) -> anyhow::Result<()> {
        (*self).run_impl().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_to_inbound_sets_fields() {
        let adapter = TelegramAdapter::new("tg_main");
        let event = adapter.to_inbound(123, "Igor", Some("hello"), false);
        assert_eq!(event.channel_type, "telegram");
        assert_eq!(event.connector_id, "tg_main");
        assert_eq!(event.conversation_id, "chat:123");
        assert_eq!(event.sender_handle, "Igor");
        assert_eq!(event.text, "hello");
        assert!(event.has_text);
        assert!(!event.is_bot_originated);
    }

    #[test]
    fn adapter_marks_non_text_and_bot_messages() {
        let adapter = TelegramAdapter::new("tg_main");
        let sticker = adapter.to_inbound(-100, "Igor", None, false);
        assert!(!sticker.has_text);
        assert_eq!(sticker.conversation_id, "chat:-100");

        let bot = adapter.to_inbound(1, "other_bot", Some("hi"), true);
        assert!(bot.is_bot_originated);
    }

    #[test]
    fn handle_prefers_username() {
        assert_eq!(handle_from_parts(Some("igor_ufo"), "Igor"), "igor_ufo");
        assert_eq!(handle_from_parts(None, "Igor"), "Igor");
        assert_eq!(handle_from_parts(Some(""), "Igor"), "Igor");
        assert_eq!(handle_from_parts(None, ""), "unknown");
        assert_eq!(sender_handle(None), "unknown");
    }

    #[test]
    fn parse_chat_id_handles_groups() {
        assert_eq!(parse_chat_id("chat:123"), Some(123));
        assert_eq!(parse_chat_id("chat:-100123"), Some(-100123));
        assert_eq!(parse_chat_id("repl:local"), None);
        assert_eq!(parse_chat_id("chat:abc"), None);
    }
}
