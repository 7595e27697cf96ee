//! Database module for the dean's office bot
//!
//! Provides persistence for users, requests, callbacks and the broadcast log.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),
    #[error("Request {0} is already closed")]
    RequestClosed(RequestId),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const USER_COLUMNS: &str = "user_id, name, role, created_at";
const REQUEST_COLUMNS: &str =
    "id, user_id, type, body, status, comment, assigned_admin, created_at, updated_at";
const CALLBACK_COLUMNS: &str = "id, user_id, phone, note, status, created_at";

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Register a user on first sight.
    ///
    /// An existing record keeps its role and its first observed non-empty
    /// name; an empty stored name is filled in once a name is known.
    pub fn ensure_user(&self, user_id: UserId, name: &str) -> DbResult<User> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (user_id, name, role, created_at) VALUES (?1, ?2, 'user', ?3)
             ON CONFLICT(user_id) DO UPDATE SET name = excluded.name
             WHERE users.name = '' AND excluded.name != ''",
            params![user_id, name.trim(), now.to_rfc3339()],
        )?;

        query_user(&conn, user_id)?.ok_or(DbError::UserNotFound(user_id))
    }

    /// Get user by ID
    pub fn get_user(&self, user_id: UserId) -> DbResult<Option<User>> {
        let conn = self.conn()?;
        query_user(&conn, user_id)
    }

    /// Change the role of an existing user
    pub fn set_user_role(&self, user_id: UserId, role: Role) -> DbResult<User> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET role = ?1 WHERE user_id = ?2",
            params![role.as_str(), user_id],
        )?;
        if updated == 0 {
            return Err(DbError::UserNotFound(user_id));
        }
        query_user(&conn, user_id)?.ok_or(DbError::UserNotFound(user_id))
    }

    /// List all users in registration order
    pub fn list_users(&self) -> DbResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, user_id ASC"
        ))?;
        let rows = stmt.query_map([], parse_user_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Request Operations ====================

    /// Create a new request with status `new`
    pub fn create_request(
        &self,
        user_id: UserId,
        request_type: &str,
        body: &str,
    ) -> DbResult<Request> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO requests (user_id, type, body, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'new', ?4, ?4)",
            params![user_id, request_type, body, now.to_rfc3339()],
        )?;

        Ok(Request {
            id: conn.last_insert_rowid(),
            user_id,
            request_type: request_type.to_string(),
            body: body.to_string(),
            status: RequestStatus::New,
            comment: None,
            assigned_admin: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get request by ID
    pub fn get_request(&self, id: RequestId) -> DbResult<Option<Request>> {
        let conn = self.conn()?;
        query_request(&conn, id)
    }

    /// Move a request to a new status, recording the acting moderator.
    ///
    /// Terminal requests are immutable and yield `RequestClosed`.
    pub fn update_request_status(
        &self,
        id: RequestId,
        status: RequestStatus,
        comment: Option<&str>,
        actor: UserId,
    ) -> DbResult<Request> {
        let conn = self.conn()?;
        let current = query_request(&conn, id)?.ok_or(DbError::RequestNotFound(id))?;
        if current.status.is_terminal() {
            return Err(DbError::RequestClosed(id));
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE requests
             SET status = ?1, comment = COALESCE(?2, comment), assigned_admin = ?3, updated_at = ?4
             WHERE id = ?5",
            params![status.as_str(), comment, actor, now.to_rfc3339(), id],
        )?;

        query_request(&conn, id)?.ok_or(DbError::RequestNotFound(id))
    }

    /// List requests matching a filter, newest first
    pub fn list_requests_filtered(&self, filter: RequestFilter) -> DbResult<Vec<Request>> {
        let conn = self.conn()?;
        let rows = match filter {
            RequestFilter::All => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests ORDER BY id DESC"
                ))?;
                let rows = stmt.query_map([], parse_request_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            RequestFilter::Status(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM requests WHERE status = ?1 ORDER BY id DESC"
                ))?;
                let rows = stmt.query_map(params![status.as_str()], parse_request_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// List requests owned by a user, newest first
    pub fn list_user_requests(&self, user_id: UserId) -> DbResult<Vec<Request>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE user_id = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], parse_request_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Callback Operations ====================

    /// Create a "call me back" request
    pub fn create_callback(&self, user_id: UserId, phone: &str, note: &str) -> DbResult<Callback> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO callbacks (user_id, phone, note, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, phone, note, CALLBACK_WAITING, now.to_rfc3339()],
        )?;

        Ok(Callback {
            id: conn.last_insert_rowid(),
            user_id,
            phone: phone.to_string(),
            note: note.to_string(),
            status: CALLBACK_WAITING.to_string(),
            created_at: now,
        })
    }

    /// List callback requests, newest first
    pub fn list_callbacks(&self) -> DbResult<Vec<Callback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CALLBACK_COLUMNS} FROM callbacks ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map([], parse_callback_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Broadcast Log ====================

    /// Append a broadcast audit record
    pub fn create_broadcast(&self, admin_id: UserId, text: &str) -> DbResult<Broadcast> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO broadcasts (admin_id, text, created_at) VALUES (?1, ?2, ?3)",
            params![admin_id, text, now.to_rfc3339()],
        )?;

        Ok(Broadcast {
            id: conn.last_insert_rowid(),
            admin_id,
            text: text.to_string(),
            created_at: now,
        })
    }

    /// List the broadcast log, newest first
    #[cfg(test)]
    pub fn list_broadcasts(&self) -> DbResult<Vec<Broadcast>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, admin_id, text, created_at FROM broadcasts ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Broadcast {
                id: row.get(0)?,
                admin_id: row.get(1)?,
                text: row.get(2)?,
                created_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn query_user(conn: &Connection, user_id: UserId) -> DbResult<Option<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"
    ))?;
    stmt.query_row(params![user_id], parse_user_row)
        .optional()
        .map_err(DbError::from)
}

fn query_request(conn: &Connection, id: RequestId) -> DbResult<Option<Request>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"
    ))?;
    stmt.query_row(params![id], parse_request_row)
        .optional()
        .map_err(DbError::from)
}

/// Parse a user row from the database
fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        name: row.get(1)?,
        role: row.get::<_, String>(2)?.parse().unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

/// Parse a request row from the database
fn parse_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Request> {
    Ok(Request {
        id: row.get(0)?,
        user_id: row.get(1)?,
        request_type: row.get(2)?,
        body: row.get(3)?,
        status: row.get::<_, String>(4)?.parse().unwrap_or_default(),
        comment: row.get(5)?,
        assigned_admin: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn parse_callback_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Callback> {
    Ok(Callback {
        id: row.get(0)?,
        user_id: row.get(1)?,
        phone: row.get(2)?,
        note: row.get(3)?,
        status: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
