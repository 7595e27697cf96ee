//! Typed button actions and text commands
//!
//! Button payloads are plain strings on the wire. They are parsed here, once,
//! into tagged variants so the transition function matches on structure and
//! never on string prefixes.

use crate::db::{RequestFilter, RequestId, Role, UserId};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Literal that aborts any active flow (compared case-insensitively)
pub const CANCEL_TOKEN: &str = "отмена";

/// Whether the text is the cancellation token or its command alias
pub fn is_cancel(text: &str) -> bool {
    let text = text.trim();
    text.to_lowercase() == CANCEL_TOKEN || text.eq_ignore_ascii_case("/cancel")
}

// ============================================================================
// Button actions
// ============================================================================

/// Moderation operation on a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationOp {
    Progress,
    Done,
    Reject,
}

impl ModerationOp {
    fn as_str(self) -> &'static str {
        match self {
            ModerationOp::Progress => "progress",
            ModerationOp::Done => "done",
            ModerationOp::Reject => "reject",
        }
    }
}

impl FromStr for ModerationOp {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(ModerationOp::Progress),
            "done" => Ok(ModerationOp::Done),
            "reject" => Ok(ModerationOp::Reject),
            _ => Err(()),
        }
    }
}

/// Action carried by an inline-keyboard button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MainMenu,
    Cancel,
    Help,
    /// Show the request type selection
    RequestMenu,
    SelectType(String),
    MyRequests,
    CallbackMenu,
    StaffRequests(RequestFilter),
    StaffCallbacks,
    StaffBroadcast,
    AdminRoles,
    Moderate {
        op: ModerationOp,
        request_id: RequestId,
        /// Listing to re-render once the action completes
        filter: RequestFilter,
    },
}

/// Payload that does not decode to any known action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown button payload: {0}")]
pub struct UnknownPayload(pub String);

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MainMenu => f.write_str("menu"),
            Action::Cancel => f.write_str("cancel"),
            Action::Help => f.write_str("help"),
            Action::RequestMenu => f.write_str("req_menu"),
            Action::SelectType(label) => write!(f, "req_type:{label}"),
            Action::MyRequests => f.write_str("my_requests"),
            Action::CallbackMenu => f.write_str("callback_menu"),
            Action::StaffRequests(filter) => write!(f, "staff_requests:{filter}"),
            Action::StaffCallbacks => f.write_str("staff_callbacks"),
            Action::StaffBroadcast => f.write_str("staff_broadcast"),
            Action::AdminRoles => f.write_str("admin_roles"),
            Action::Moderate {
                op,
                request_id,
                filter,
            } => write!(f, "mod:{}:{request_id}:{filter}", op.as_str()),
        }
    }
}

impl FromStr for Action {
    type Err = UnknownPayload;

    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownPayload(payload.to_string());

        let action = match payload.split_once(':') {
            None => match payload {
                "menu" => Action::MainMenu,
                "cancel" => Action::Cancel,
                "help" => Action::Help,
                "req_menu" => Action::RequestMenu,
                "my_requests" => Action::MyRequests,
                "callback_menu" => Action::CallbackMenu,
                "staff_requests" => Action::StaffRequests(RequestFilter::All),
                "staff_callbacks" => Action::StaffCallbacks,
                "staff_broadcast" => Action::StaffBroadcast,
                "admin_roles" => Action::AdminRoles,
                _ => return Err(unknown()),
            },
            Some(("req_type", label)) if !label.trim().is_empty() => {
                Action::SelectType(label.trim().to_string())
            }
            Some(("staff_requests", filter)) => {
                Action::StaffRequests(filter.parse().map_err(|_| unknown())?)
            }
            Some(("mod", rest)) => {
                let mut parts = rest.split(':');
                let (Some(op), Some(id), filter, None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return Err(unknown());
                };
                Action::Moderate {
                    op: op.parse().map_err(|()| unknown())?,
                    request_id: id.parse().map_err(|_| unknown())?,
                    filter: filter
                        .map(str::parse)
                        .transpose()
                        .map_err(|_| unknown())?
                        .unwrap_or_default(),
                }
            }
            Some(_) => return Err(unknown()),
        };
        Ok(action)
    }
}

// ============================================================================
// Text commands
// ============================================================================

/// Slash command typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Menu,
    Help,
    About,
    Cancel,
    /// Assign a role to another user (admin only)
    Role { target: UserId, role: Role },
}

/// A recognized command with unusable arguments
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Использование: /role <user_id> <user|dekanat|admin>")]
    RoleUsage,
    #[error("Неизвестная роль «{0}». Допустимые роли: user, dekanat, admin.")]
    UnknownRole(String),
}

/// Parse a text message as a command.
///
/// Returns `None` when the text is not a recognized command, so that the
/// router can try the remaining rules.
pub fn parse_command(text: &str) -> Option<Result<Command, CommandError>> {
    let mut words = text.split_whitespace();
    let head = words.next()?;
    // "/start@dean_bot" addresses this bot explicitly
    let name = head.split_once('@').map_or(head, |(name, _)| name);

    let command = match name.to_lowercase().as_str() {
        "/start" | "/menu" => Command::Menu,
        "/help" => Command::Help,
        "/about" => Command::About,
        "/cancel" => Command::Cancel,
        "/role" => {
            let (Some(target), Some(role), None) = (words.next(), words.next(), words.next())
            else {
                return Some(Err(CommandError::RoleUsage));
            };
            let Ok(target) = target.parse::<UserId>() else {
                return Some(Err(CommandError::RoleUsage));
            };
            return Some(
                role.parse()
                    .map(|role| Command::Role { target, role })
                    .map_err(|_| CommandError::UnknownRole(role.to_string())),
            );
        }
        _ => return None,
    };
    Some(Ok(command))
}
