use serde::{Deserialize, Serialize};

use crate::order::{child_pointer, PropertyOrder, ROOT};

/// Field names of an actor's reply object, in the order used when no
/// provider-emitted order is known.
pub const ACTOR_FIELDS: [&str; 2] = ["thoughts", "answer"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTurn {
    pub handle: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorTurn {
    pub handle: String,
    pub thoughts: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub property_order: PropertyOrder,
}

impl ActorTurn {
    /// Build a turn whose order is the default `{handle: {thoughts, answer}}`.
    pub fn new(handle: impl Into<String>, thoughts: Vec<String>, answer: impl Into<String>) -> Self {
        let handle = handle.into();
        let mut property_order = PropertyOrder::new();
        property_order.record(ROOT, vec![handle.clone()]);
        property_order.record(
            child_pointer(ROOT, &handle),
            ACTOR_FIELDS.iter().map(|f| f.to_string()).collect(),
        );
        Self {
            handle,
            thoughts,
            answer: answer.into(),
            property_order,
        }
    }

    pub fn with_property_order(mut self, order: PropertyOrder) -> Self {
        self.property_order = order;
        self
    }
}

/// One contribution to a conversation. Arrival order is significant: it is
/// replayed verbatim into every later prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Actor(ActorTurn),
}

impl Turn {
    pub fn user(handle: impl Into<String>, text: impl Into<String>) -> Self {
        Turn::User(UserTurn {
            handle: handle.into(),
            text: text.into(),
        })
    }

    pub fn handle(&self) -> &str {
        match self {
            Turn::User(turn) => &turn.handle,
            Turn::Actor(turn) => &turn.handle,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Turn::User(_) => "user",
            Turn::Actor(_) => "actor",
        }
    }
}

impl From<ActorTurn> for Turn {
    fn from(turn: ActorTurn) -> Self {
        Turn::Actor(turn)
    }
}

impl From<UserTurn> for Turn {
    fn from(turn: UserTurn) -> Self {
        Turn::User(turn)
    }
}
