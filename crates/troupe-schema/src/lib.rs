pub mod intent;
pub mod order;
pub mod turn;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use intent::*;
pub use order::*;
pub use turn::*;

/// A chat message normalized by a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub trace_id: Uuid,
    pub channel_type: String,
    pub connector_id: String,
    pub conversation_id: String,
    pub sender_handle: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_bot_originated: bool,
    #[serde(default = "default_has_text")]
    pub has_text: bool,
    pub at: DateTime<Utc>,
}

fn default_has_text() -> bool {
    true
}

impl InboundEvent {
    pub fn text(
        channel_type: impl Into<String>,
        connector_id: impl Into<String>,
        conversation_id: impl Into<String>,
        sender_handle: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            trace_id: Uuid::new_v4(),
            channel_type: channel_type.into(),
            connector_id: connector_id.into(),
            conversation_id: conversation_id.into(),
            sender_handle: sender_handle.into(),
            has_text: !text.is_empty(),
            text,
            is_bot_originated: false,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub trace_id: Uuid,
    pub conversation_id: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(trace_id: Uuid, conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            trace_id,
            conversation_id: conversation_id.into(),
            text: text.into(),
            at: Utc::now(),
        }
    }
}
