//! Session table of in-progress flows
//!
//! Holds at most one flow state per user. `Idle` is never stored: setting it
//! clears the entry. With a TTL, stale entries read as absent and are evicted
//! on access.

use crate::db::UserId;
use crate::state_machine::ConvState;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    state: ConvState,
    touched: Instant,
}

pub struct SessionTable {
    entries: Mutex<HashMap<UserId, Entry>>,
    ttl: Option<Duration>,
}

impl SessionTable {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, Entry>> {
        // The map holds plain data, so a panic mid-update cannot leave it torn
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current flow of a user; `Idle` when none or expired
    pub fn get(&self, user_id: UserId) -> ConvState {
        let mut entries = self.entries();
        let expired = match (entries.get(&user_id), self.ttl) {
            (Some(entry), Some(ttl)) => entry.touched.elapsed() >= ttl,
            (Some(_), None) => false,
            (None, _) => return ConvState::Idle,
        };
        if expired {
            entries.remove(&user_id);
            tracing::debug!(user_id, "Session expired");
            return ConvState::Idle;
        }
        entries
            .get(&user_id)
            .map_or(ConvState::Idle, |entry| entry.state.clone())
    }

    /// Store a flow; `Idle` clears
    pub fn set(&self, user_id: UserId, state: ConvState) {
        if !state.is_active() {
            self.clear(user_id);
            return;
        }
        self.entries().insert(
            user_id,
            Entry {
                state,
                touched: Instant::now(),
            },
        );
    }

    pub fn clear(&self, user_id: UserId) {
        if self.entries().remove(&user_id).is_some() {
            tracing::debug!(user_id, "Flow cleared");
        }
    }

    /// Number of stored flows, expired ones included until touched
    pub fn open_flows(&self) -> usize {
        self.entries().len()
    }
}
