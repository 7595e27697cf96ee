//! Events that can occur in a conversation

use crate::db::UserId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Media attached to a message.
///
/// Kept opaque, top-level fields included, so it can be re-sent to other
/// users as received.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Fields outside `payload`, such as a location's coordinates
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Text message, possibly carrying attachments
    Message {
        text: String,
        attachments: Vec<Attachment>,
    },
    /// Inline-keyboard button press
    Button { payload: String },
}

impl Event {
    pub fn text(text: impl Into<String>) -> Self {
        Event::Message {
            text: text.into(),
            attachments: vec![],
        }
    }

    pub fn button(payload: impl Into<String>) -> Self {
        Event::Button {
            payload: payload.into(),
        }
    }
}

/// An event as received from the transport, before the sender is resolved
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Absent when the platform did not identify the sender
    pub user_id: Option<UserId>,
    pub display_name: String,
    /// Set for button presses that must be acknowledged
    pub callback_id: Option<String>,
    pub event: Event,
}

impl Inbound {
    pub fn new(user_id: UserId, event: Event) -> Self {
        Self {
            user_id: Some(user_id),
            display_name: String::new(),
            callback_id: None,
            event,
        }
    }

    #[allow(dead_code)] // Test and webhook convenience
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}
