//! Pure state transition function
//!
//! Routing is an ordered dispatch table: the first route whose predicate
//! matches handles the event. An active flow sits at the top, so flow state
//! always beats commands.

use super::action::{is_cancel, parse_command, Action, Command, CommandError, ModerationOp};
use super::gate::{self, ADMINS, STAFF};
use super::{Attachment, ConvContext, ConvState, Effect, Event};
use crate::db::{RequestFilter, RequestId, RequestStatus};
use crate::replies;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// User-visible failures. The display text is sent to the user as is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("❌ Недостаточно прав.")]
    Unauthorized,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Сначала завершите текущее действие или напишите «отмена».")]
    FlowBusy,
    /// Collaborator failure; the detail is only logged
    #[error("Не удалось выполнить действие. Попробуйте ещё раз позже.")]
    Bridge(String),
}

impl FlowError {
    pub fn request_not_found(id: RequestId) -> Self {
        FlowError::NotFound(format!("Заявка #{id} не найдена."))
    }

    pub fn request_closed(id: RequestId) -> Self {
        FlowError::Validation(format!("Заявка #{id} уже закрыта."))
    }
}

/// Dispatch rules, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A flow is in progress and consumes the event
    ActiveFlow,
    /// Slash command, cancellation token or button press
    Command,
    /// Free text `type: body`
    RequestShorthand,
    /// Free text shaped like a phone number
    CallbackPhone,
    Fallback,
}

pub const DISPATCH_ORDER: [Route; 5] = [
    Route::ActiveFlow,
    Route::Command,
    Route::RequestShorthand,
    Route::CallbackPhone,
    Route::Fallback,
];

fn phone_pattern() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^\+?\d{7,15}$").expect("phone pattern is valid"))
}

impl Route {
    pub fn matches(self, state: &ConvState, event: &Event) -> bool {
        match (self, event) {
            (Route::ActiveFlow, _) => state.is_active(),
            (Route::Command, Event::Button { .. }) => true,
            (Route::Command, Event::Message { text, .. }) => {
                is_cancel(text) || parse_command(text).is_some()
            }
            (Route::RequestShorthand, Event::Message { text, .. }) => text.contains(':'),
            (Route::CallbackPhone, Event::Message { text, .. }) => {
                phone_pattern().is_match(text.trim())
            }
            (Route::RequestShorthand | Route::CallbackPhone, Event::Button { .. }) => false,
            (Route::Fallback, _) => true,
        }
    }

    fn handle(
        self,
        state: &ConvState,
        ctx: &ConvContext,
        event: Event,
    ) -> Result<TransitionResult, FlowError> {
        match (self, event) {
            (Route::ActiveFlow, event) => continue_flow(state, ctx, event),
            (Route::Command, Event::Button { payload }) => match payload.parse::<Action>() {
                Ok(action) => handle_action(ctx, action),
                Err(_) => Err(FlowError::Validation(
                    "Неизвестное действие. Откройте меню: /start".to_string(),
                )),
            },
            (Route::Command, Event::Message { text, .. }) => {
                if is_cancel(&text) {
                    return handle_command(ctx, Command::Cancel);
                }
                match parse_command(&text) {
                    Some(Ok(command)) => handle_command(ctx, command),
                    Some(Err(err)) => handle_command_error(ctx, &err),
                    None => Ok(fallback()),
                }
            }
            (Route::RequestShorthand, Event::Message { text, .. }) => request_shorthand(&text),
            (Route::CallbackPhone, Event::Message { text, .. }) => {
                Ok(TransitionResult::new(ConvState::Idle).with_effect(Effect::CreateCallback {
                    phone: text.trim().to_string(),
                }))
            }
            _ => Ok(fallback()),
        }
    }
}

/// Route that handles an event in the given state
pub fn route_for(state: &ConvState, event: &Event) -> Route {
    DISPATCH_ORDER
        .into_iter()
        .find(|route| route.matches(state, event))
        .unwrap_or(Route::Fallback)
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. All reads and
/// writes against the directory and the transport are expressed as effects.
pub fn transition(
    state: &ConvState,
    ctx: &ConvContext,
    event: Event,
) -> Result<TransitionResult, FlowError> {
    route_for(state, &event).handle(state, ctx, event)
}

fn fallback() -> TransitionResult {
    TransitionResult::new(ConvState::Idle).with_effect(Effect::reply_text(replies::UNRECOGNIZED))
}

fn unchanged(state: &ConvState) -> TransitionResult {
    TransitionResult::new(state.clone())
}

// ============================================================================
// Active flows
// ============================================================================

fn continue_flow(
    state: &ConvState,
    ctx: &ConvContext,
    event: Event,
) -> Result<TransitionResult, FlowError> {
    let (text, attachments) = match event {
        Event::Button { payload } => {
            return match payload.parse::<Action>() {
                Ok(Action::Cancel | Action::MainMenu) => Ok(cancel_flow(state, ctx)),
                _ => Err(FlowError::FlowBusy),
            };
        }
        Event::Message { text, attachments } => (text, attachments),
    };

    if is_cancel(&text) {
        return Ok(cancel_flow(state, ctx));
    }

    match state {
        ConvState::ComposingBroadcast {
            attachments: collected,
        } => compose_broadcast(ctx, collected, text.trim(), attachments),
        ConvState::AwaitingRequestBody { request_type } => {
            let body = text.trim();
            if body.is_empty() {
                return Ok(unchanged(state));
            }
            Ok(
                TransitionResult::new(ConvState::Idle).with_effect(Effect::CreateRequest {
                    request_type: request_type.clone(),
                    body: body.to_string(),
                }),
            )
        }
        ConvState::RejectingRequest { request_id, filter } => {
            gate::require(ctx.role, STAFF)?;
            let reason = text.trim();
            if reason.is_empty() {
                return Ok(unchanged(state));
            }
            Ok(
                TransitionResult::new(ConvState::Idle).with_effect(Effect::UpdateRequestStatus {
                    request_id: *request_id,
                    status: RequestStatus::Rejected,
                    comment: Some(reason.to_string()),
                    filter: *filter,
                }),
            )
        }
        // ActiveFlow never matches Idle
        ConvState::Idle => Ok(fallback()),
    }
}

fn cancel_flow(state: &ConvState, ctx: &ConvContext) -> TransitionResult {
    match state {
        ConvState::RejectingRequest { filter, .. } if gate::allows(ctx.role, STAFF) => {
            TransitionResult::new(ConvState::Idle).with_effects([
                Effect::reply_text("Отклонение отменено."),
                Effect::ShowRequests { filter: *filter },
            ])
        }
        _ => TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::reply(replies::cancelled(ctx.role))),
    }
}

/// Attachments accumulate; the first non-empty text triggers the fan-out
fn compose_broadcast(
    ctx: &ConvContext,
    collected: &[Attachment],
    text: &str,
    incoming: Vec<Attachment>,
) -> Result<TransitionResult, FlowError> {
    let has_incoming = !incoming.is_empty();
    let mut attachments = collected.to_vec();
    attachments.extend(incoming);

    if text.is_empty() {
        if !has_incoming {
            return Ok(TransitionResult::new(ConvState::ComposingBroadcast {
                attachments,
            }));
        }
        let total = attachments.len();
        return Ok(
            TransitionResult::new(ConvState::ComposingBroadcast { attachments })
                .with_effect(Effect::reply(replies::attachments_added(total))),
        );
    }

    // The role may have changed since the flow started
    gate::require(ctx.role, STAFF)?;

    Ok(TransitionResult::new(ConvState::Idle).with_effects([
        Effect::reply(replies::broadcast_started()),
        Effect::RunBroadcast {
            text: text.to_string(),
            attachments,
        },
    ]))
}

// ============================================================================
// Commands and button actions
// ============================================================================

fn handle_command(ctx: &ConvContext, command: Command) -> Result<TransitionResult, FlowError> {
    let idle = TransitionResult::new(ConvState::Idle);
    let result = match command {
        Command::Menu => idle.with_effect(Effect::reply(replies::main_menu(ctx.role))),
        Command::Help => idle.with_effect(Effect::reply(replies::help(ctx.role))),
        Command::About => idle.with_effect(Effect::reply(replies::about())),
        Command::Cancel => idle.with_effect(Effect::reply(replies::cancelled(ctx.role))),
        Command::Role { target, role } => {
            gate::require(ctx.role, ADMINS)?;
            idle.with_effect(Effect::AssignRole { target, role })
        }
    };
    Ok(result)
}

fn handle_command_error(
    ctx: &ConvContext,
    err: &CommandError,
) -> Result<TransitionResult, FlowError> {
    // Non-admins learn nothing about the command's syntax
    gate::require(ctx.role, ADMINS)?;
    Err(FlowError::Validation(err.to_string()))
}

fn handle_action(ctx: &ConvContext, action: Action) -> Result<TransitionResult, FlowError> {
    let idle = TransitionResult::new(ConvState::Idle);
    let result = match action {
        Action::MainMenu => idle.with_effect(Effect::reply(replies::main_menu(ctx.role))),
        Action::Cancel => idle.with_effect(Effect::reply(replies::cancelled(ctx.role))),
        Action::Help => idle.with_effect(Effect::reply(replies::help(ctx.role))),
        Action::RequestMenu => {
            idle.with_effect(Effect::reply(replies::request_type_menu(&ctx.request_types)))
        }
        Action::SelectType(label) => {
            let label = label.to_lowercase();
            if !ctx
                .request_types
                .iter()
                .any(|t| t.to_lowercase() == label)
            {
                return Err(FlowError::Validation(format!(
                    "Неизвестный тип заявки «{label}»."
                )));
            }
            let prompt = replies::request_body_prompt(&label);
            TransitionResult::new(ConvState::AwaitingRequestBody {
                request_type: label,
            })
            .with_effect(Effect::reply(prompt))
        }
        Action::MyRequests => idle.with_effect(Effect::ShowOwnRequests),
        Action::CallbackMenu => idle.with_effect(Effect::reply(replies::callback_prompt())),
        Action::StaffRequests(filter) => {
            gate::require(ctx.role, STAFF)?;
            idle.with_effect(Effect::ShowRequests { filter })
        }
        Action::StaffCallbacks => {
            gate::require(ctx.role, STAFF)?;
            idle.with_effect(Effect::ShowCallbacks)
        }
        Action::StaffBroadcast => {
            gate::require(ctx.role, STAFF)?;
            TransitionResult::new(ConvState::ComposingBroadcast {
                attachments: vec![],
            })
            .with_effect(Effect::reply(replies::broadcast_prompt()))
        }
        Action::AdminRoles => {
            gate::require(ctx.role, ADMINS)?;
            idle.with_effect(Effect::ShowUsers)
        }
        Action::Moderate {
            op,
            request_id,
            filter,
        } => {
            gate::require(ctx.role, STAFF)?;
            moderate(op, request_id, filter)
        }
    };
    Ok(result)
}

fn moderate(op: ModerationOp, request_id: RequestId, filter: RequestFilter) -> TransitionResult {
    let update = |status| Effect::UpdateRequestStatus {
        request_id,
        status,
        comment: None,
        filter,
    };
    match op {
        ModerationOp::Progress => {
            TransitionResult::new(ConvState::Idle).with_effect(update(RequestStatus::InProgress))
        }
        ModerationOp::Done => {
            TransitionResult::new(ConvState::Idle).with_effect(update(RequestStatus::Done))
        }
        ModerationOp::Reject => {
            TransitionResult::new(ConvState::RejectingRequest { request_id, filter })
                .with_effects([
                    Effect::CheckModerationTarget { request_id },
                    Effect::reply(replies::reject_prompt(request_id)),
                ])
        }
    }
}

// ============================================================================
// Free-text patterns
// ============================================================================

/// `type: body` creates a request directly
fn request_shorthand(text: &str) -> Result<TransitionResult, FlowError> {
    let Some((label, body)) = text.split_once(':') else {
        return Ok(fallback());
    };
    let (label, body) = (label.trim().to_lowercase(), body.trim());
    if label.is_empty() || body.is_empty() {
        return Err(FlowError::Validation(replies::SHORTHAND_FORMAT.to_string()));
    }
    Ok(
        TransitionResult::new(ConvState::Idle).with_effect(Effect::CreateRequest {
            request_type: label,
            body: body.to_string(),
        }),
    )
}
