//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the dispatcher with mock implementations.

use crate::db::{
    Broadcast, Callback, Database, DbError, Request, RequestFilter, RequestId, RequestStatus,
    Role, User, UserId,
};
use crate::max::DeliveryError;
use crate::replies::OutgoingMessage;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure of the directory collaborator
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    /// The addressed record does not exist
    NotFound,
    /// The request is terminal and can no longer change
    Closed,
    /// Storage failed or is unreachable
    Unavailable,
}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Unavailable, message)
    }
}

impl From<DbError> for BridgeError {
    fn from(err: DbError) -> Self {
        let kind = match err {
            DbError::UserNotFound(_) | DbError::RequestNotFound(_) => BridgeErrorKind::NotFound,
            DbError::RequestClosed(_) => BridgeErrorKind::Closed,
            DbError::Sqlite(_) | DbError::LockPoisoned => BridgeErrorKind::Unavailable,
        };
        Self::new(kind, err.to_string())
    }
}

/// Persistent store of users, requests, callbacks and the broadcast log
#[async_trait]
pub trait Directory: Send + Sync {
    /// Register a user on first sight; idempotent
    async fn ensure_user(&self, user_id: UserId, name: &str) -> Result<User, BridgeError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, BridgeError>;

    async fn set_user_role(&self, user_id: UserId, role: Role) -> Result<User, BridgeError>;

    async fn list_users(&self) -> Result<Vec<User>, BridgeError>;

    async fn create_request(
        &self,
        user_id: UserId,
        request_type: &str,
        body: &str,
    ) -> Result<Request, BridgeError>;

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, BridgeError>;

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        actor: UserId,
    ) -> Result<Request, BridgeError>;

    async fn list_requests_filtered(
        &self,
        filter: RequestFilter,
    ) -> Result<Vec<Request>, BridgeError>;

    async fn list_user_requests(&self, user_id: UserId) -> Result<Vec<Request>, BridgeError>;

    async fn create_callback(
        &self,
        user_id: UserId,
        phone: &str,
        note: &str,
    ) -> Result<Callback, BridgeError>;

    async fn list_callbacks(&self) -> Result<Vec<Callback>, BridgeError>;

    /// Append one audit record for a completed fan-out
    async fn create_broadcast(&self, admin_id: UserId, text: &str)
        -> Result<Broadcast, BridgeError>;
}

/// Chat transport used to reach users
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        user_id: UserId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError>;

    /// Acknowledge a button press so the client stops its spinner
    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Directory + ?Sized> Directory for Arc<T> {
    async fn ensure_user(&self, user_id: UserId, name: &str) -> Result<User, BridgeError> {
        (**self).ensure_user(user_id, name).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, BridgeError> {
        (**self).get_user(user_id).await
    }

    async fn set_user_role(&self, user_id: UserId, role: Role) -> Result<User, BridgeError> {
        (**self).set_user_role(user_id, role).await
    }

    async fn list_users(&self) -> Result<Vec<User>, BridgeError> {
        (**self).list_users().await
    }

    async fn create_request(
        &self,
        user_id: UserId,
        request_type: &str,
        body: &str,
    ) -> Result<Request, BridgeError> {
        (**self).create_request(user_id, request_type, body).await
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, BridgeError> {
        (**self).get_request(id).await
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        actor: UserId,
    ) -> Result<Request, BridgeError> {
        (**self)
            .update_request_status(id, status, comment, actor)
            .await
    }

    async fn list_requests_filtered(
        &self,
        filter: RequestFilter,
    ) -> Result<Vec<Request>, BridgeError> {
        (**self).list_requests_filtered(filter).await
    }

    async fn list_user_requests(&self, user_id: UserId) -> Result<Vec<Request>, BridgeError> {
        (**self).list_user_requests(user_id).await
    }

    async fn create_callback(
        &self,
        user_id: UserId,
        phone: &str,
        note: &str,
    ) -> Result<Callback, BridgeError> {
        (**self).create_callback(user_id, phone, note).await
    }

    async fn list_callbacks(&self) -> Result<Vec<Callback>, BridgeError> {
        (**self).list_callbacks().await
    }

    async fn create_broadcast(
        &self,
        admin_id: UserId,
        text: &str,
    ) -> Result<Broadcast, BridgeError> {
        (**self).create_broadcast(admin_id, text).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_message(
        &self,
        user_id: UserId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        (**self).send_message(user_id, message).await
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        (**self).answer_callback(callback_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Directory
#[derive(Clone)]
pub struct DatabaseDirectory {
    db: Database,
}

impl DatabaseDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Directory for DatabaseDirectory {
    async fn ensure_user(&self, user_id: UserId, name: &str) -> Result<User, BridgeError> {
        Ok(self.db.ensure_user(user_id, name)?)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, BridgeError> {
        Ok(self.db.get_user(user_id)?)
    }

    async fn set_user_role(&self, user_id: UserId, role: Role) -> Result<User, BridgeError> {
        Ok(self.db.set_user_role(user_id, role)?)
    }

    async fn list_users(&self) -> Result<Vec<User>, BridgeError> {
        Ok(self.db.list_users()?)
    }

    async fn create_request(
        &self,
        user_id: UserId,
        request_type: &str,
        body: &str,
    ) -> Result<Request, BridgeError> {
        Ok(self.db.create_request(user_id, request_type, body)?)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>, BridgeError> {
        Ok(self.db.get_request(id)?)
    }

    async fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        actor: UserId,
    ) -> Result<Request, BridgeError> {
        Ok(self.db.update_request_status(id, status, comment, actor)?)
    }

    async fn list_requests_filtered(
        &self,
        filter: RequestFilter,
    ) -> Result<Vec<Request>, BridgeError> {
        Ok(self.db.list_requests_filtered(filter)?)
    }

    async fn list_user_requests(&self, user_id: UserId) -> Result<Vec<Request>, BridgeError> {
        Ok(self.db.list_user_requests(user_id)?)
    }

    async fn create_callback(
        &self,
        user_id: UserId,
        phone: &str,
        note: &str,
    ) -> Result<Callback, BridgeError> {
        Ok(self.db.create_callback(user_id, phone, note)?)
    }

    async fn list_callbacks(&self) -> Result<Vec<Callback>, BridgeError> {
        Ok(self.db.list_callbacks()?)
    }

    async fn create_broadcast(
        &self,
        admin_id: UserId,
        text: &str,
    ) -> Result<Broadcast, BridgeError> {
        Ok(self.db.create_broadcast(admin_id, text)?)
    }
}
