//! HTTP surface: webhook ingress and health
//!
//! Used when the bot runs in webhook mode; in polling mode only the runtime
//! is started.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::runtime::SharedRuntime;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<SharedRuntime>,
}

impl AppState {
    pub fn new(runtime: Arc<SharedRuntime>) -> Self {
        Self { runtime }
    }
}
