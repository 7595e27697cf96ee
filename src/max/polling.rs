//! Long-polling ingress

use super::client::MaxClient;
use super::error::DeliveryError;
use super::types::UpdateList;
use crate::runtime::{Directory, RuntimeManager, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Server-side wait of one long-poll request
pub const POLL_WAIT: Duration = Duration::from_secs(30);

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Source of update pages
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn next_page(&self, marker: Option<i64>) -> Result<UpdateList, DeliveryError>;
}

#[async_trait]
impl UpdateSource for MaxClient {
    async fn next_page(&self, marker: Option<i64>) -> Result<UpdateList, DeliveryError> {
        self.get_updates(marker, POLL_WAIT).await
    }
}

/// Delay before the next poll after `failures` consecutive errors:
/// 1s, 2s, 4s, ... capped at one minute, never below the server's hint
fn backoff(failures: u32, retry_after: Option<Duration>) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    let delay = Duration::from_secs(1 << exponent).min(MAX_BACKOFF);
    retry_after.map_or(delay, |hint| hint.max(delay))
}

/// Poll until cancelled, submitting every update to the runtime in order
pub async fn run_polling<S, D, T>(
    source: &S,
    runtime: &RuntimeManager<D, T>,
    cancel: &CancellationToken,
) where
    S: UpdateSource + ?Sized,
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    let mut marker = None;
    let mut failures = 0u32;
    tracing::info!("Long polling started");

    loop {
        let page = tokio::select! {
            () = cancel.cancelled() => break,
            page = source.next_page(marker) => page,
        };

        match page {
            Ok(page) => {
                failures = 0;
                if page.marker.is_some() {
                    marker = page.marker;
                }
                let count = page.updates.len();
                for inbound in page.into_inbound() {
                    runtime.submit(inbound).await;
                }
                if count > 0 {
                    tracing::debug!(count, ?marker, "Updates received");
                }
            }
            Err(e) => {
                failures += 1;
                let delay = backoff(failures, e.retry_after);
                if e.kind.is_retryable() {
                    tracing::warn!(error = %e, failures, delay_secs = delay.as_secs(), "Polling failed");
                } else {
                    tracing::error!(error = %e, failures, delay_secs = delay.as_secs(), "Polling failed");
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::info!("Long polling stopped");
}
