//! Effects produced by state transitions

use crate::db::{RequestFilter, RequestId, RequestStatus, Role, UserId};
use crate::replies::OutgoingMessage;
use crate::state_machine::Attachment;

/// Effects to be executed after a state transition, in order.
///
/// Effects that read or write the directory render their own replies from
/// the records they produce, so the transition never needs the result.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a message to the acting user
    Reply(OutgoingMessage),

    /// Create a request owned by the acting user and confirm its id
    CreateRequest { request_type: String, body: String },

    /// Register a "call me back" request for the acting user
    CreateCallback { phone: String },

    /// List the acting user's own requests
    ShowOwnRequests,

    /// Staff listing of requests
    ShowRequests { filter: RequestFilter },

    /// Staff listing of callback requests
    ShowCallbacks,

    /// Admin listing of users and their roles
    ShowUsers,

    /// Fail unless the request exists and is still open
    CheckModerationTarget { request_id: RequestId },

    /// Move a request to a new status, notify its owner, re-render the list
    UpdateRequestStatus {
        request_id: RequestId,
        status: RequestStatus,
        comment: Option<String>,
        filter: RequestFilter,
    },

    /// Change another user's role and notify them
    AssignRole { target: UserId, role: Role },

    /// Fan a message out to every known user and report the tally
    RunBroadcast {
        text: String,
        attachments: Vec<Attachment>,
    },
}

impl Effect {
    pub fn reply(message: OutgoingMessage) -> Self {
        Effect::Reply(message)
    }

    pub fn reply_text(text: impl Into<String>) -> Self {
        Effect::Reply(OutgoingMessage::text(text))
    }

    /// Whether the effect writes to the directory
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Effect::CreateRequest { .. }
                | Effect::CreateCallback { .. }
                | Effect::UpdateRequestStatus { .. }
                | Effect::AssignRole { .. }
                | Effect::RunBroadcast { .. }
        )
    }
}
