//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::action::{is_cancel, CANCEL_TOKEN};
use super::transition::*;
use super::*;
use crate::db::{RequestFilter, RequestStatus, Role};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(role: Role) -> ConvContext {
    ConvContext::new(
        1,
        role,
        Arc::from(vec!["справка".to_string(), "вопрос".to_string()]),
    )
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::User), Just(Role::Dekanat), Just(Role::Admin)]
}

fn arb_filter() -> impl Strategy<Value = RequestFilter> {
    proptest::sample::select(RequestFilter::ALL.to_vec())
}

fn arb_attachment() -> impl Strategy<Value = Attachment> {
    ("(image|file|video)", "[a-z0-9]{4,12}").prop_map(|(kind, token)| Attachment {
        kind,
        payload: json!({ "token": token }),
        ..Default::default()
    })
}

fn arb_active_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        proptest::collection::vec(arb_attachment(), 0..4)
            .prop_map(|attachments| ConvState::ComposingBroadcast { attachments }),
        "(справка|вопрос)".prop_map(|request_type| ConvState::AwaitingRequestBody { request_type }),
        (1i64..1000, arb_filter())
            .prop_map(|(request_id, filter)| ConvState::RejectingRequest { request_id, filter }),
    ]
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![Just(ConvState::Idle), arb_active_state()]
}

/// Free text that is not the cancellation token, commands included
fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Zа-яА-Я0-9 ]{1,40}",
        Just("/start".to_string()),
        Just("/role 5 admin".to_string()),
        Just("справка: нужна справка".to_string()),
        Just("+79991234567".to_string()),
    ]
    .prop_filter("not blank or cancel", |t| {
        !t.trim().is_empty() && !is_cancel(t)
    })
}

fn arb_payload() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("menu".to_string()),
        Just("req_menu".to_string()),
        Just("staff_broadcast".to_string()),
        Just("staff_callbacks".to_string()),
        Just("admin_roles".to_string()),
        (1i64..100).prop_map(|id| format!("mod:done:{id}:all")),
        "[a-z_:]{0,20}",
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_text().prop_map(Event::text),
        arb_payload().prop_map(Event::button),
        proptest::collection::vec(arb_attachment(), 1..3).prop_map(|attachments| {
            Event::Message {
                text: String::new(),
                attachments,
            }
        }),
    ]
}

fn arb_cancel_spelling() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(CANCEL_TOKEN.to_string()),
        Just("ОТМЕНА".to_string()),
        Just("  Отмена ".to_string()),
        Just("/cancel".to_string()),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Non-staff can never open broadcast composition
    #[test]
    fn prop_non_staff_broadcast_denied(state in Just(ConvState::Idle)) {
        let result = transition(&state, &test_context(Role::User), Event::button("staff_broadcast"));
        prop_assert_eq!(result.unwrap_err(), FlowError::Unauthorized);
    }

    /// While composing, any non-cancel text triggers the fan-out, even if it
    /// looks like a command
    #[test]
    fn prop_composing_text_triggers_broadcast(
        collected in proptest::collection::vec(arb_attachment(), 0..4),
        text in arb_text(),
        role in prop_oneof![Just(Role::Dekanat), Just(Role::Admin)],
    ) {
        let state = ConvState::ComposingBroadcast { attachments: collected.clone() };
        let result = transition(&state, &test_context(role), Event::text(text.clone())).unwrap();

        prop_assert_eq!(result.new_state, ConvState::Idle);
        let expected = Effect::RunBroadcast {
            text: text.trim().to_string(),
            attachments: collected,
        };
        prop_assert!(result.effects.contains(&expected));
        prop_assert_eq!(result.effects.iter().filter(|e| e.is_mutation()).count(), 1);
    }

    /// Cancelling a body or reason prompt clears state and mutates nothing
    #[test]
    fn prop_cancel_never_mutates(
        state in arb_active_state(),
        role in arb_role(),
        cancel in arb_cancel_spelling(),
    ) {
        let result = transition(&state, &test_context(role), Event::text(cancel)).unwrap();
        prop_assert_eq!(result.new_state, ConvState::Idle);
        prop_assert!(!result.effects.iter().any(Effect::is_mutation));
    }

    /// An active flow consumes every event; nothing reaches the command or
    /// pattern routes
    #[test]
    fn prop_state_beats_commands(state in arb_active_state(), event in arb_event()) {
        prop_assert_eq!(route_for(&state, &event), Route::ActiveFlow);
    }

    /// Buttons other than cancel never change an active flow
    #[test]
    fn prop_buttons_mid_flow_keep_state(
        state in arb_active_state(),
        role in arb_role(),
        payload in arb_payload().prop_filter("not cancel", |p| p != "menu" && p != "cancel"),
    ) {
        let result = transition(&state, &test_context(role), Event::button(payload));
        prop_assert_eq!(result.unwrap_err(), FlowError::FlowBusy);
    }

    /// Users without a staff role never produce staff effects from any state
    #[test]
    fn prop_users_never_moderate(state in arb_state(), event in arb_event()) {
        if let Ok(result) = transition(&state, &test_context(Role::User), event) {
            for effect in &result.effects {
                let privileged = matches!(
                    effect,
                    Effect::UpdateRequestStatus { .. }
                        | Effect::AssignRole { .. }
                        | Effect::RunBroadcast { .. }
                        | Effect::ShowRequests { .. }
                        | Effect::ShowCallbacks
                        | Effect::ShowUsers
                );
                prop_assert!(!privileged, "user produced {:?}", effect);
            }
        }
    }

    /// Rejecting with a reason always lands on a rejected status with that
    /// comment, for the listing the moderator came from
    #[test]
    fn prop_reject_reason_is_recorded(
        request_id in 1i64..1000,
        filter in arb_filter(),
        reason in "[a-zA-Zа-яА-Я ]{1,30}".prop_filter("not blank or cancel", |t| {
            !t.trim().is_empty() && !is_cancel(t)
        }),
    ) {
        let state = ConvState::RejectingRequest { request_id, filter };
        let result = transition(&state, &test_context(Role::Dekanat), Event::text(reason.clone())).unwrap();
        prop_assert_eq!(
            result.effects,
            vec![Effect::UpdateRequestStatus {
                request_id,
                status: RequestStatus::Rejected,
                comment: Some(reason.trim().to_string()),
                filter,
            }]
        );
    }
}
