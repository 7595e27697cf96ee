//! MAX messenger Bot API transport
//!
//! Outgoing messages and callback acknowledgements go through [`MaxClient`];
//! updates arrive either by long polling ([`run_polling`]) or through the
//! webhook endpoint of the HTTP API.

mod client;
mod error;
mod polling;
pub mod types;

pub use client::{MaxClient, DEFAULT_API_URL};
pub use error::DeliveryError;
pub use polling::run_polling;

use crate::db::UserId;
use crate::replies::OutgoingMessage;
use crate::runtime::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Logging wrapper for a transport
pub struct LoggingTransport {
    inner: Arc<dyn Transport>,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send_message(
        &self,
        user_id: UserId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let result = self.inner.send_message(user_id, message).await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => tracing::debug!(
                user_id,
                duration_ms = %duration.as_millis(),
                attachments = message.attachments.len(),
                buttons = message.keyboard.as_ref().map_or(0, |k| k.buttons().count()),
                "Message delivered"
            ),
            Err(e) => tracing::warn!(
                user_id,
                duration_ms = %duration.as_millis(),
                error = %e.message,
                retryable = e.kind.is_retryable(),
                "Message delivery failed"
            ),
        }

        result
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let result = self.inner.answer_callback(callback_id).await;
        if let Err(e) = &result {
            tracing::warn!(
                callback_id,
                duration_ms = %start.elapsed().as_millis(),
                error = %e.message,
                "Callback answer failed"
            );
        }
        result
    }
}
