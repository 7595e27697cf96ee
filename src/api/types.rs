//! API response types

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_workers: usize,
    pub open_flows: usize,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// False when the update was dropped instead of queued
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
