use std::path::{Path, PathBuf};

use rusqlite::OptionalExtension;
use tracing::instrument;

use tern_core::errors::ErrorCause;
use tern_core::ids::SessionId;
use tern_core::session::{Session, SessionStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_SESSION: &str =
    "SELECT id, project_root, status, error, created_at, updated_at FROM sessions";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new active session.
    #[instrument(skip(self), fields(project_root = %project_root.display()))]
    pub fn create(&self, project_root: &Path) -> Result<Session, StoreError> {
        let now = row_helpers::now();
        let session = Session {
            id: SessionId::new(),
            project_root: project_root.to_path_buf(),
            status: SessionStatus::Active,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let stamp = row_helpers::format_time(&now);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, project_root, status, created_at, updated_at)
                 VALUES (?1, ?2, 'active', ?3, ?4)",
                rusqlite::params![
                    session.id.as_str(),
                    project_root.to_string_lossy(),
                    stamp,
                    stamp,
                ],
            )?;
            Ok(())
        })?;
        Ok(session)
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_SESSION} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// List sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut results = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_SESSION} WHERE status = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![status.as_str(), limit, offset])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_session(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_SESSION} ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![limit, offset])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_session(row)?);
                    }
                }
            }
            Ok(results)
        })
    }

    /// Set the session status and, for errored sessions, the cause.
    #[instrument(skip(self, cause), fields(session_id = %id, status = %status))]
    pub fn update_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        cause: Option<&ErrorCause>,
    ) -> Result<Session, StoreError> {
        let cause_json = cause.map(serde_json::to_string).transpose()?;
        let now = row_helpers::format_time(&row_helpers::now());
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![status.as_str(), cause_json, now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })?;
        self.get(id)
    }

    /// Delete a session. Messages and parts go with it.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let exists: Option<String> = tx
                .query_row("SELECT id FROM sessions WHERE id = ?1", [id.as_str()], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            tx.execute(
                "DELETE FROM parts WHERE message_id IN (SELECT id FROM messages WHERE session_id = ?1)",
                [id.as_str()],
            )?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [id.as_str()])?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let id: String = row_helpers::get(row, 0, "sessions", "id")?;
    let project_root: String = row_helpers::get(row, 1, "sessions", "project_root")?;
    let status: String = row_helpers::get(row, 2, "sessions", "status")?;
    let error: Option<String> = row_helpers::get_opt(row, 3, "sessions", "error")?;
    let created_at: String = row_helpers::get(row, 4, "sessions", "created_at")?;
    let updated_at: String = row_helpers::get(row, 5, "sessions", "updated_at")?;

    Ok(Session {
        id: SessionId::from_raw(id),
        project_root: PathBuf::from(project_root),
        status: row_helpers::parse_enum(&status, SessionStatus::parse, "sessions", "status")?,
        error: error
            .map(|raw| row_helpers::parse_json(&raw, "sessions", "error"))
            .transpose()?,
        created_at: row_helpers::parse_time(&created_at, "sessions", "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, "sessions", "updated_at")?,
    })
}
