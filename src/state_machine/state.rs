//! Conversation state types

use crate::db::{RequestFilter, RequestId, Role, UserId};
use crate::state_machine::event::Attachment;
use std::sync::Arc;

/// Conversation state of one user.
///
/// `Idle` is the absence of a flow; the session table never stores it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConvState {
    /// No multi-step flow in progress
    #[default]
    Idle,

    /// Staff member is assembling a broadcast; attachments accumulate until
    /// a text message triggers the fan-out
    ComposingBroadcast { attachments: Vec<Attachment> },

    /// Request type chosen, waiting for the free-text body
    AwaitingRequestBody { request_type: String },

    /// Moderator pressed "reject", waiting for the reason
    RejectingRequest {
        request_id: RequestId,
        /// Listing the moderator came from, re-rendered afterwards
        filter: RequestFilter,
    },
}

impl ConvState {
    /// Whether a flow is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, ConvState::Idle)
    }

    /// Mode name used in logs
    pub fn mode(&self) -> &'static str {
        match self {
            ConvState::Idle => "none",
            ConvState::ComposingBroadcast { .. } => "composing_broadcast",
            ConvState::AwaitingRequestBody { .. } => "awaiting_request_body",
            ConvState::RejectingRequest { .. } => "rejecting_request",
        }
    }
}

/// Per-event context handed to the transition function.
///
/// The role is looked up for every event, so a role change applies to the
/// very next action.
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub user_id: UserId,
    pub role: Role,
    /// Request types offered in the type-selection menu
    pub request_types: Arc<[String]>,
}

impl ConvContext {
    pub fn new(user_id: UserId, role: Role, request_types: Arc<[String]>) -> Self {
        Self {
            user_id,
            role,
            request_types,
        }
    }
}
