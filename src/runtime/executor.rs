//! Event dispatcher
//!
//! Runs one inbound event through the pure transition function and executes
//! the resulting effects against the directory and the transport. The new
//! flow state is committed only when every effect succeeded, so a failed
//! event can be retried with the same input.

use super::broadcast::BroadcastEngine;
use super::sessions::SessionTable;
use super::traits::{BridgeError, BridgeErrorKind, Directory, Transport};
use crate::db::{RequestFilter, RequestId, RequestStatus, Role, User, UserId};
use crate::replies::{self, OutgoingMessage};
use crate::state_machine::{transition, ConvContext, Effect, Event, FlowError, Inbound};
use std::sync::Arc;
use std::time::Duration;

/// Static settings of the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Bootstrap administrator; always resolves to the admin role
    pub owner_id: Option<UserId>,
    pub request_types: Arc<[String]>,
    pub session_ttl: Option<Duration>,
    pub broadcast_concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            owner_id: None,
            request_types: Arc::from(vec![
                "справка".to_string(),
                "вопрос".to_string(),
                "заявление".to_string(),
            ]),
            session_ttl: None,
            broadcast_concurrency: 1,
        }
    }
}

/// Dispatcher over any directory and transport implementation
pub struct Dispatcher<D, T>
where
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    directory: Arc<D>,
    transport: Arc<T>,
    sessions: SessionTable,
    broadcast: BroadcastEngine<Arc<D>, Arc<T>>,
    owner_id: Option<UserId>,
    request_types: Arc<[String]>,
}

fn bridge(err: BridgeError) -> FlowError {
    FlowError::Bridge(err.message)
}

fn moderation_error(request_id: RequestId, err: BridgeError) -> FlowError {
    match err.kind {
        BridgeErrorKind::NotFound => FlowError::request_not_found(request_id),
        BridgeErrorKind::Closed => FlowError::request_closed(request_id),
        BridgeErrorKind::Unavailable => bridge(err),
    }
}

impl<D, T> Dispatcher<D, T>
where
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    pub fn new(directory: Arc<D>, transport: Arc<T>, settings: DispatchSettings) -> Self {
        Self {
            broadcast: BroadcastEngine::new(
                directory.clone(),
                transport.clone(),
                settings.broadcast_concurrency,
            ),
            directory,
            transport,
            sessions: SessionTable::new(settings.session_ttl),
            owner_id: settings.owner_id,
            request_types: settings.request_types,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Handle one inbound event end to end. Never fails: errors become
    /// replies to the acting user.
    pub async fn handle(&self, inbound: Inbound) {
        let Inbound {
            user_id,
            display_name,
            callback_id,
            event,
        } = inbound;

        let Some(user_id) = user_id else {
            tracing::debug!("Dropping event without sender");
            return;
        };

        if let Some(callback_id) = callback_id {
            if let Err(e) = self.transport.answer_callback(&callback_id).await {
                tracing::warn!(user_id, error = %e, "Failed to acknowledge button press");
            }
        }

        if let Err(err) = self.process(user_id, &display_name, event).await {
            match &err {
                FlowError::Bridge(detail) => {
                    tracing::error!(user_id, error = %detail, "Collaborator failure");
                }
                other => tracing::info!(user_id, reason = %other, "Event rejected"),
            }
            self.reply(user_id, OutgoingMessage::text(err.to_string()))
                .await;
        }
    }

    async fn process(&self, user_id: UserId, name: &str, event: Event) -> Result<(), FlowError> {
        let user = self
            .directory
            .ensure_user(user_id, name)
            .await
            .map_err(bridge)?;
        let ctx = ConvContext::new(user_id, self.effective_role(&user), self.request_types.clone());

        let state = self.sessions.get(user_id);
        let result = transition(&state, &ctx, event)?;

        tracing::debug!(
            user_id,
            role = %ctx.role,
            from = state.mode(),
            to = result.new_state.mode(),
            effects = result.effects.len(),
            mutations = result.effects.iter().filter(|e| e.is_mutation()).count(),
            "Transition"
        );

        for effect in result.effects {
            self.execute_effect(&ctx, effect).await?;
        }

        self.sessions.set(user_id, result.new_state);
        Ok(())
    }

    fn effective_role(&self, user: &User) -> Role {
        if self.owner_id == Some(user.user_id) {
            Role::Admin
        } else {
            user.role
        }
    }

    async fn execute_effect(&self, ctx: &ConvContext, effect: Effect) -> Result<(), FlowError> {
        let user_id = ctx.user_id;
        match effect {
            Effect::Reply(message) => self.reply(user_id, message).await,

            Effect::CreateRequest { request_type, body } => {
                let request = self
                    .directory
                    .create_request(user_id, &request_type, &body)
                    .await
                    .map_err(bridge)?;
                tracing::info!(
                    user_id,
                    request_id = request.id,
                    request_type = %request.request_type,
                    "Request created"
                );
                self.reply(user_id, replies::request_created(&request)).await;
            }

            Effect::CreateCallback { phone } => {
                let callback = self
                    .directory
                    .create_callback(user_id, &phone, "")
                    .await
                    .map_err(bridge)?;
                tracing::info!(user_id, callback_id = callback.id, "Callback requested");
                self.reply(user_id, replies::callback_created(&callback)).await;
            }

            Effect::ShowOwnRequests => {
                let requests = self
                    .directory
                    .list_user_requests(user_id)
                    .await
                    .map_err(bridge)?;
                self.reply(user_id, replies::own_requests(&requests)).await;
            }

            Effect::ShowRequests { filter } => {
                let requests = self
                    .directory
                    .list_requests_filtered(filter)
                    .await
                    .map_err(bridge)?;
                self.reply(user_id, replies::request_list(&requests, filter))
                    .await;
            }

            Effect::ShowCallbacks => {
                let callbacks = self.directory.list_callbacks().await.map_err(bridge)?;
                self.reply(user_id, replies::callback_list(&callbacks)).await;
            }

            Effect::ShowUsers => {
                let users = self.directory.list_users().await.map_err(bridge)?;
                self.reply(user_id, replies::roles_overview(&users)).await;
            }

            Effect::CheckModerationTarget { request_id } => {
                self.check_moderation_target(request_id).await?;
            }

            Effect::UpdateRequestStatus {
                request_id,
                status,
                comment,
                filter,
            } => {
                self.moderate(user_id, request_id, status, comment.as_deref(), filter)
                    .await?;
            }

            Effect::AssignRole { target, role } => self.assign_role(user_id, target, role).await?,

            Effect::RunBroadcast { text, attachments } => {
                let report = self
                    .broadcast
                    .run(user_id, &text, &attachments)
                    .await
                    .map_err(bridge)?;
                tracing::info!(
                    admin_id = user_id,
                    recipients = report.recipients,
                    sent = report.sent,
                    skipped = report.skipped,
                    "Broadcast delivered"
                );
                self.reply(
                    user_id,
                    replies::broadcast_report(report.sent, report.skipped, report.audit_recorded),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn moderate(
        &self,
        moderator: UserId,
        request_id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        filter: RequestFilter,
    ) -> Result<(), FlowError> {
        self.check_moderation_target(request_id).await?;
        let request = self
            .directory
            .update_request_status(request_id, status, comment, moderator)
            .await
            .map_err(|e| moderation_error(request_id, e))?;
        tracing::info!(
            moderator,
            request_id,
            status = %request.status,
            "Request status changed"
        );

        self.reply(moderator, replies::status_updated(&request)).await;
        self.reply(request.user_id, replies::status_notification(&request))
            .await;

        // The change is committed; a failed re-render must not undo the flow
        match self.directory.list_requests_filtered(filter).await {
            Ok(requests) => {
                self.reply(moderator, replies::request_list(&requests, filter))
                    .await;
            }
            Err(e) => tracing::warn!(moderator, error = %e, "Failed to re-render list"),
        }
        Ok(())
    }

    async fn assign_role(
        &self,
        admin_id: UserId,
        target: UserId,
        role: Role,
    ) -> Result<(), FlowError> {
        let exists = self.directory.get_user(target).await.map_err(bridge)?;
        if exists.is_none() {
            return Err(FlowError::NotFound(format!(
                "Пользователь {target} не найден. Он должен сначала написать боту."
            )));
        }
        let updated = self
            .directory
            .set_user_role(target, role)
            .await
            .map_err(bridge)?;
        tracing::info!(admin_id, target, role = %updated.role, "Role changed");

        self.reply(admin_id, replies::role_changed(target, updated.role))
            .await;
        self.reply(target, replies::role_granted(updated.role)).await;
        Ok(())
    }

    /// Fail unless the request exists and can still change
    async fn check_moderation_target(&self, request_id: RequestId) -> Result<(), FlowError> {
        match self
            .directory
            .get_request(request_id)
            .await
            .map_err(bridge)?
        {
            None => Err(FlowError::request_not_found(request_id)),
            Some(request) if request.status.is_terminal() => {
                Err(FlowError::request_closed(request_id))
            }
            Some(_) => Ok(()),
        }
    }

    /// Best-effort delivery of a reply or notification
    async fn reply(&self, user_id: UserId, message: OutgoingMessage) {
        if let Err(e) = self.transport.send_message(user_id, &message).await {
            tracing::warn!(user_id, error = %e, "Failed to deliver reply");
        }
    }
}
