//! Wire types of the MAX Bot API
//!
//! Only the fields the bot reads or writes are modelled; everything else in
//! the payloads is ignored.

use crate::db::UserId;
use crate::replies::{Keyboard, OutgoingMessage};
use crate::state_machine::{Attachment, Event, Inbound};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Update types requested from `GET /updates`
pub const SUBSCRIBED_TYPES: &str = "message_created,message_callback,bot_started";

/// Response of `GET /updates`.
///
/// Updates stay raw here so that one malformed entry cannot cost the page.
#[derive(Debug, Deserialize)]
pub struct UpdateList {
    #[serde(default)]
    pub updates: Vec<Value>,
    /// Pass back to receive the next page; absent when nothing is pending
    pub marker: Option<i64>,
}

impl UpdateList {
    /// Decode each update on its own, skipping malformed and unhandled ones
    pub fn into_inbound(self) -> Vec<Inbound> {
        self.updates
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Update>(raw) {
                Ok(update) => update.into_inbound(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed update");
                    None
                }
            })
            .collect()
    }
}

/// One update, as delivered by long polling or by webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "update_type", rename_all = "snake_case")]
pub enum Update {
    MessageCreated {
        message: Message,
    },
    MessageCallback {
        callback: Callback,
    },
    BotStarted {
        #[serde(default)]
        user: Option<MaxUser>,
    },
    /// Any update type the bot does not handle
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaxUser {
    pub user_id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl MaxUser {
    fn display_name(&self) -> String {
        self.first_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub sender: Option<MaxUser>,
    #[serde(default)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Callback {
    pub callback_id: String,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub user: Option<MaxUser>,
}

/// Sender id and name; an anonymous event is dropped by the runtime
fn identify(user: Option<&MaxUser>) -> (Option<UserId>, String) {
    user.map_or((None, String::new()), |user| {
        (Some(user.user_id), user.display_name())
    })
}

impl Update {
    /// Normalize into a chat event; `None` for update types the bot ignores
    pub fn into_inbound(self) -> Option<Inbound> {
        match self {
            Update::MessageCreated { message } => {
                let (user_id, display_name) = identify(message.sender.as_ref());
                Some(Inbound {
                    user_id,
                    display_name,
                    callback_id: None,
                    event: Event::Message {
                        text: message.body.text.unwrap_or_default(),
                        attachments: message.body.attachments,
                    },
                })
            }
            Update::MessageCallback { callback } => {
                let (user_id, display_name) = identify(callback.user.as_ref());
                Some(Inbound {
                    user_id,
                    display_name,
                    event: Event::button(callback.payload.unwrap_or_default()),
                    callback_id: Some(callback.callback_id),
                })
            }
            // Opening the bot behaves like /start
            Update::BotStarted { user } => {
                let (user_id, display_name) = identify(user.as_ref());
                Some(Inbound {
                    user_id,
                    display_name,
                    callback_id: None,
                    event: Event::text("/start"),
                })
            }
            Update::Other => None,
        }
    }
}

// ============================================================================
// Outgoing
// ============================================================================

/// Body of `POST /messages`
#[derive(Debug, Serialize)]
pub struct NewMessageBody {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutgoingAttachment {
    /// Media forwarded as received
    Media(Attachment),
    Keyboard(InlineKeyboard),
}

#[derive(Debug, Serialize)]
pub struct InlineKeyboard {
    #[serde(rename = "type")]
    kind: &'static str,
    payload: KeyboardPayload,
}

#[derive(Debug, Serialize)]
struct KeyboardPayload {
    buttons: Vec<Vec<CallbackButton>>,
}

#[derive(Debug, Serialize)]
struct CallbackButton {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    payload: String,
}

impl From<&Keyboard> for InlineKeyboard {
    fn from(keyboard: &Keyboard) -> Self {
        let buttons = keyboard
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| CallbackButton {
                        kind: "callback",
                        text: button.text.clone(),
                        payload: button.payload.clone(),
                    })
                    .collect()
            })
            .collect();
        Self {
            kind: "inline_keyboard",
            payload: KeyboardPayload { buttons },
        }
    }
}

impl From<&OutgoingMessage> for NewMessageBody {
    fn from(message: &OutgoingMessage) -> Self {
        let mut attachments: Vec<_> = message
            .attachments
            .iter()
            .cloned()
            .map(OutgoingAttachment::Media)
            .collect();
        if let Some(keyboard) = message.keyboard.as_ref().filter(|k| !k.rows.is_empty()) {
            attachments.push(OutgoingAttachment::Keyboard(keyboard.into()));
        }
        Self {
            text: message.text.clone(),
            attachments,
        }
    }
}

/// Body of `POST /answers`
#[derive(Debug, Serialize)]
pub struct CallbackAnswer {
    pub notification: String,
}
