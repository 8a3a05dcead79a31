use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use tern_core::errors::ErrorCause;
use tern_core::ids::{MessageId, PartId, SessionId};
use tern_core::messages::{Message, Part, PartPayload, Role};
use tern_core::session::{Session, SessionStatus};

use crate::error::StoreError;
use crate::row_helpers;
use crate::Store;

struct MessageSlot {
    message: Message,
    parts: Mutex<Vec<Part>>,
}

/// In-process store. Locks are per session (message index) and per message
/// (parts), so unrelated sessions never contend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<SessionId, Session>,
    session_messages: DashMap<SessionId, Arc<Mutex<Vec<MessageId>>>>,
    messages: DashMap<MessageId, Arc<MessageSlot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn message_slot(&self, id: &MessageId) -> Result<Arc<MessageSlot>, StoreError> {
        self.messages
            .get(id)
            .map(|slot| slot.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("message {id}")))
    }

    fn message_ids(&self, session_id: &SessionId) -> Result<Arc<Mutex<Vec<MessageId>>>, StoreError> {
        self.session_messages
            .get(session_id)
            .map(|ids| ids.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, project_root: &Path) -> Result<Session, StoreError> {
        let now = row_helpers::now();
        let session = Session {
            id: SessionId::new(),
            project_root: project_root.to_path_buf(),
            status: SessionStatus::Active,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.session_messages
            .insert(session.id.clone(), Arc::new(Mutex::new(Vec::new())));
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        cause: Option<ErrorCause>,
    ) -> Result<Session, StoreError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.status = status;
        session.error = cause;
        session.updated_at = row_helpers::now();
        Ok(session.value().clone())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        if let Some((_, ids)) = self.session_messages.remove(id) {
            for message_id in ids.lock().iter() {
                self.messages.remove(message_id);
            }
        }
        Ok(())
    }

    async fn append_message(&self, session_id: &SessionId, role: Role) -> Result<Message, StoreError> {
        let ids = self.message_ids(session_id)?;
        let mut ids = ids.lock();
        let message = Message {
            id: MessageId::new(),
            session_id: session_id.clone(),
            index: ids.len() as u32 + 1,
            role,
            created_at: row_helpers::now(),
        };
        self.messages.insert(
            message.id.clone(),
            Arc::new(MessageSlot {
                message: message.clone(),
                parts: Mutex::new(Vec::new()),
            }),
        );
        ids.push(message.id.clone());
        Ok(message)
    }

    async fn append_part(
        &self,
        message_id: &MessageId,
        sequence: u32,
        payload: PartPayload,
    ) -> Result<Part, StoreError> {
        let slot = self.message_slot(message_id)?;
        let mut parts = slot.parts.lock();

        let expected = match parts.last() {
            Some(last) if last.payload.is_terminal() => {
                return Err(StoreError::MessageSealed(message_id.clone()));
            }
            Some(last) => last.sequence + 1,
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
            payload,
            created_at: row_helpers::now(),
        };
        parts.push(part.clone());
        Ok(part)
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let ids = self.message_ids(session_id)?;
        let ids = ids.lock().clone();
        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|slot| slot.message.clone()))
            .collect())
    }

    async fn list_parts(&self, message_id: &MessageId) -> Result<Vec<Part>, StoreError> {
        let slot = self.message_slot(message_id)?;
        let parts = slot.parts.lock().clone();
        Ok(parts)
    }
}
