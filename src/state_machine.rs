//! Per-user conversation state machine
//!
//! Implements the Elm Architecture pattern: a pure transition function maps
//! (state, context, event) to the next state plus effects, and the runtime
//! executes the effects against the directory and the transport.

pub mod action;
mod effect;
pub mod event;
pub mod gate;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use action::{Action, ModerationOp};
pub use effect::Effect;
pub use event::{Attachment, Event, Inbound};
pub use state::{ConvContext, ConvState};
pub use transition::{transition, FlowError};
