//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform-assigned user identifier
pub type UserId = i64;

/// Request identifier
pub type RequestId = i64;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    type TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    comment TEXT,
    assigned_admin INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status, id DESC);
CREATE INDEX IF NOT EXISTS idx_requests_user ON requests(user_id, id DESC);

CREATE TABLE IF NOT EXISTS callbacks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    phone TEXT NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'waiting',
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

CREATE TABLE IF NOT EXISTS broadcasts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    admin_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

// ============================================================================
// Users
// ============================================================================

/// Access role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Dekanat,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Dekanat, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Dekanat => "dekanat",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role name that is not one of `user`, `dekanat`, `admin`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "dekanat" => Ok(Role::Dekanat),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// User record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

/// Lifecycle status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    New,
    InProgress,
    Done,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::New => "new",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Done => "done",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// Terminal requests accept no further moderation
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Done | RequestStatus::Rejected)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(RequestStatus::New),
            "in_progress" => Ok(RequestStatus::InProgress),
            "done" => Ok(RequestStatus::Done),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Filter dimension for staff request listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestFilter {
    #[default]
    All,
    Status(RequestStatus),
}

impl RequestFilter {
    pub const ALL: [RequestFilter; 5] = [
        RequestFilter::All,
        RequestFilter::Status(RequestStatus::New),
        RequestFilter::Status(RequestStatus::InProgress),
        RequestFilter::Status(RequestStatus::Done),
        RequestFilter::Status(RequestStatus::Rejected),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestFilter::All => "all",
            RequestFilter::Status(status) => status.as_str(),
        }
    }

    pub fn matches(self, status: RequestStatus) -> bool {
        match self {
            RequestFilter::All => true,
            RequestFilter::Status(wanted) => wanted == status,
        }
    }
}

impl fmt::Display for RequestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(RequestFilter::All);
        }
        s.parse().map(RequestFilter::Status)
    }
}

/// Request submitted to the dean's office
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub user_id: UserId,
    pub request_type: String,
    pub body: String,
    pub status: RequestStatus,
    pub comment: Option<String>,
    pub assigned_admin: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Callbacks and broadcasts
// ============================================================================

/// "Call me back" request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    pub id: i64,
    pub user_id: UserId,
    pub phone: String,
    pub note: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Initial status of a callback request
pub const CALLBACK_WAITING: &str = "waiting";

/// Audit record of one completed fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub admin_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
