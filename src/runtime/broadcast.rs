//! Broadcast fan-out
//!
//! Delivers one message to every known user. Deliveries are independent: a
//! failure is logged and counted as skipped, never propagated.

use super::traits::{BridgeError, Directory, Transport};
use crate::db::UserId;
use crate::replies::OutgoingMessage;
use crate::state_machine::Attachment;
use futures::stream::{self, StreamExt};

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub sent: usize,
    pub skipped: usize,
    /// Whether the audit record was written
    pub audit_recorded: bool,
}

pub struct BroadcastEngine<D, T> {
    directory: D,
    transport: T,
    /// Deliveries in flight at once; 1 is strictly sequential
    concurrency: usize,
}

impl<D: Directory, T: Transport> BroadcastEngine<D, T> {
    pub fn new(directory: D, transport: T, concurrency: usize) -> Self {
        Self {
            directory,
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver `text` and `attachments` to every user, then append the audit
    /// record.
    ///
    /// Only a failure to load the recipient list is an error; nothing has
    /// been sent at that point.
    pub async fn run(
        &self,
        admin_id: UserId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<BroadcastReport, BridgeError> {
        let recipients = self.directory.list_users().await?;
        let message = OutgoingMessage::text(text).with_attachments(attachments.to_vec());

        tracing::info!(
            admin_id,
            recipients = recipients.len(),
            attachments = attachments.len(),
            concurrency = self.concurrency,
            "Broadcast started"
        );

        // Owned ids: a borrowing iterator here makes the future non-Send
        let ids: Vec<UserId> = recipients.iter().map(|user| user.user_id).collect();
        let message = &message;
        let (sent, skipped) = stream::iter(ids)
            .map(|user_id| async move {
                match self.transport.send_message(user_id, message).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "Broadcast delivery failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .fold((0usize, 0usize), |(sent, skipped), delivered| async move {
                if delivered {
                    (sent + 1, skipped)
                } else {
                    (sent, skipped + 1)
                }
            })
            .await;

        let audit_recorded = match self.directory.create_broadcast(admin_id, text).await {
            Ok(record) => {
                tracing::debug!(broadcast_id = record.id, "Broadcast recorded");
                true
            }
            Err(e) => {
                tracing::error!(admin_id, error = %e, "Failed to record broadcast");
                false
            }
        };

        tracing::info!(admin_id, sent, skipped, "Broadcast finished");

        Ok(BroadcastReport {
            recipients: recipients.len(),
            sent,
            skipped,
            audit_recorded,
        })
    }
}
