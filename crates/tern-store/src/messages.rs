use rusqlite::OptionalExtension;
use tracing::instrument;

use tern_core::ids::{MessageId, PartId, SessionId};
use tern_core::messages::{HistoryEntry, Message, Part, PartPayload, Role};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TERMINAL_KINDS: [&str; 2] = ["finish", "aborted"];

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to a session. The index is assigned inside the
    /// insert transaction.
    #[instrument(skip(self), fields(session_id = %session_id, role = role.as_str()))]
    pub fn append(&self, session_id: &SessionId, role: Role) -> Result<Message, StoreError> {
        let now = row_helpers::now();
        let stamp = row_helpers::format_time(&now);
        self.db.with_tx(|tx| {
            let exists: Option<String> = tx
                .query_row("SELECT id FROM sessions WHERE id = ?1", [session_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }

            let last: u32 = tx.query_row(
                "SELECT COALESCE(MAX(idx), 0) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;

            let message = Message {
                id: MessageId::new(),
                session_id: session_id.clone(),
                index: last + 1,
                role,
                created_at: now,
            };
            tx.execute(
                "INSERT INTO messages (id, session_id, idx, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.as_str(),
                    session_id.as_str(),
                    message.index,
                    role.as_str(),
                    stamp,
                ],
            )?;
            Ok(message)
        })
    }

    /// List messages for a session in index order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, idx, role, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY idx ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Append a part. Fails with `SequenceConflict` unless `sequence` is
    /// exactly last + 1, and with `MessageSealed` after a terminal part.
    #[instrument(skip(self, payload), fields(message_id = %message_id, sequence, kind = payload.kind()))]
    pub fn append_part(
        &self,
        message_id: &MessageId,
        sequence: u32,
        payload: &PartPayload,
    ) -> Result<Part, StoreError> {
        let now = row_helpers::now();
        let stamp = row_helpers::format_time(&now);
        let payload_json = serde_json::to_string(payload)?;

        self.db.with_tx(|tx| {
            let exists: Option<String> = tx
                .query_row("SELECT id FROM messages WHERE id = ?1", [message_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("message {message_id}")));
            }

            let last: Option<(u32, String)> = tx
                .query_row(
                    "SELECT sequence, kind FROM parts WHERE message_id = ?1
                     ORDER BY sequence DESC LIMIT 1",
                    [message_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let expected = match &last {
                Some((_, kind)) if TERMINAL_KINDS.contains(&kind.as_str()) => {
                    return Err(StoreError::MessageSealed(message_id.clone()));
                }
                Some((seq, _)) => seq + 1,
                None => 1,
            };
            if sequence != expected {
                return Err(StoreError::SequenceConflict {
                    message_id: message_id.clone(),
                    expected,
                    actual: sequence,
                });
            }

            let part = Part {
                id: PartId::new(),
                message_id: message_id.clone(),
                sequence,
                payload: payload.clone(),
                created_at: now,
            };
            tx.execute(
                "INSERT INTO parts (id, message_id, sequence, kind, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    part.id.as_str(),
                    message_id.as_str(),
                    sequence,
                    payload.kind(),
                    payload_json,
                    stamp,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::SequenceConflict {
                        message_id: message_id.clone(),
                        expected,
                        actual: sequence,
                    }
                }
                other => other.into(),
            })?;
            Ok(part)
        })
    }

    /// List parts of a message in sequence order.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn list_parts(&self, message_id: &MessageId) -> Result<Vec<Part>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, sequence, payload, created_at
                 FROM parts WHERE message_id = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([message_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_part(row)?);
            }
            Ok(results)
        })
    }

    /// All messages of a session with their parts, in order. One read
    /// under a single lock, so the snapshot is consistent.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn history(&self, session_id: &SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, idx, role, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY idx ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(HistoryEntry {
                    message: row_to_message(row)?,
                    parts: Vec::new(),
                });
            }

            let mut stmt = conn.prepare(
                "SELECT p.id, p.message_id, p.sequence, p.payload, p.created_at
                 FROM parts p JOIN messages m ON m.id = p.message_id
                 WHERE m.session_id = ?1 ORDER BY m.idx ASC, p.sequence ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut cursor = 0;
            while let Some(row) = rows.next()? {
                let part = row_to_part(row)?;
                while cursor < entries.len() && entries[cursor].message.id != part.message_id {
                    cursor += 1;
                }
                match entries.get_mut(cursor) {
                    Some(entry) => entry.parts.push(part),
                    None => {
                        return Err(StoreError::CorruptRow {
                            table: "parts",
                            column: "message_id",
                            detail: format!("orphan part {}", part.id),
                        })
                    }
                }
            }
            Ok(entries)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let id: String = row_helpers::get(row, 0, "messages", "id")?;
    let session_id: String = row_helpers::get(row, 1, "messages", "session_id")?;
    let role: String = row_helpers::get(row, 3, "messages", "role")?;
    let created_at: String = row_helpers::get(row, 4, "messages", "created_at")?;

    Ok(Message {
        id: MessageId::from_raw(id),
        session_id: SessionId::from_raw(session_id),
        index: row_helpers::get(row, 2, "messages", "idx")?,
        role: row_helpers::parse_enum(&role, Role::parse, "messages", "role")?,
        created_at: row_helpers::parse_time(&created_at, "messages", "created_at")?,
    })
}

fn row_to_part(row: &rusqlite::Row<'_>) -> Result<Part, StoreError> {
    let id: String = row_helpers::get(row, 0, "parts", "id")?;
    let message_id: String = row_helpers::get(row, 1, "parts", "message_id")?;
    let payload: String = row_helpers::get(row, 3, "parts", "payload")?;
    let created_at: String = row_helpers::get(row, 4, "parts", "created_at")?;

    Ok(Part {
        id: PartId::from_raw(id),
        message_id: MessageId::from_raw(message_id),
        sequence: row_helpers::get(row, 2, "parts", "sequence")?,
        payload: row_helpers::parse_json(&payload, "parts", "payload")?,
        created_at: row_helpers::parse_time(&created_at, "parts", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use std::path::Path;
    use tern_core::messages::{AbortReason, FinishReason};

    fn setup() -> (MessageRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(Path::new("/tmp")).unwrap();
        (MessageRepo::new(db), session.id)
    }

    #[test]
    fn message_indices_are_sequential() {
        let (repo, sid) = setup();
        let m1 = repo.append(&sid, Role::User).unwrap();
        let m2 = repo.append(&sid, Role::Assistant).unwrap();
        assert_eq!((m1.index, m2.index), (1, 2));

        let listed = repo.list(&sid).unwrap();
        assert_eq!(listed, vec![m1, m2]);
    }

    #[test]
    fn append_to_missing_session() {
        let (repo, _) = setup();
        let err = repo.append(&SessionId::from_raw("ses_none"), Role::User).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn parts_must_be_gapless() {
        let (repo, sid) = setup();
        let m = repo.append(&sid, Role::Assistant).unwrap();

        repo.append_part(&m.id, 1, &PartPayload::text("a")).unwrap();
        let err = repo.append_part(&m.id, 3, &PartPayload::text("c")).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 2, actual: 3, .. }));

        let err = repo.append_part(&m.id, 1, &PartPayload::text("dup")).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 2, actual: 1, .. }));

        repo.append_part(&m.id, 2, &PartPayload::text("b")).unwrap();
        let seqs: Vec<u32> = repo.list_parts(&m.id).unwrap().iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn first_part_must_be_one() {
        let (repo, sid) = setup();
        let m = repo.append(&sid, Role::User).unwrap();
        let err = repo.append_part(&m.id, 0, &PartPayload::text("x")).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn terminal_part_seals_message() {
        let (repo, sid) = setup();
        let m = repo.append(&sid, Role::Assistant).unwrap();
        repo.append_part(
            &m.id,
            1,
            &PartPayload::Aborted {
                reason: AbortReason::Cancelled,
                detail: "stop".into(),
            },
        )
        .unwrap();

        let err = repo.append_part(&m.id, 2, &PartPayload::text("late")).unwrap_err();
        assert!(matches!(err, StoreError::MessageSealed(_)));
    }

    #[test]
    fn append_part_to_missing_message() {
        let (repo, _) = setup();
        let err = repo
            .append_part(&MessageId::from_raw("msg_none"), 1, &PartPayload::text("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn history_groups_parts_by_message() {
        let (repo, sid) = setup();
        let user = repo.append(&sid, Role::User).unwrap();
        repo.append_part(&user.id, 1, &PartPayload::text("hi")).unwrap();
        let empty = repo.append(&sid, Role::Assistant).unwrap();
        let reply = repo.append(&sid, Role::Assistant).unwrap();
        repo.append_part(&reply.id, 1, &PartPayload::text("hello")).unwrap();
        repo.append_part(
            &reply.id,
            2,
            &PartPayload::Finish {
                reason: FinishReason::EndTurn,
                summary: None,
            },
        )
        .unwrap();

        let history = repo.history(&sid).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].text(), "hi");
        assert_eq!(history[1].message.id, empty.id);
        assert!(history[1].parts.is_empty());
        assert_eq!(history[2].parts.len(), 2);
        assert!(history[2].is_sealed());
    }

    #[test]
    fn payload_round_trips_through_storage() {
        let (repo, sid) = setup();
        let m = repo.append(&sid, Role::Assistant).unwrap();
        let payload = PartPayload::ToolCall {
            call_id: tern_core::ids::ToolCallId::from_raw("call_1"),
            name: "read_file".into(),
            arguments: serde_json::json!({"path": "src/lib.rs"}),
        };
        let written = repo.append_part(&m.id, 1, &payload).unwrap();
        let read = repo.list_parts(&m.id).unwrap();
        assert_eq!(read, vec![written]);
    }
}
