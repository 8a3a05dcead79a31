use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use tern_core::errors::ErrorCause;
use tern_core::ids::{MessageId, SessionId};
use tern_core::messages::{HistoryEntry, Message, Part, PartPayload, Role};
use tern_core::session::{Session, SessionStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;
use crate::sessions::SessionRepo;
use crate::Store;

struct Repos {
    sessions: SessionRepo,
    messages: MessageRepo,
}

/// SQLite-backed store. Every call runs its repo work on the blocking pool,
/// one transaction per append.
#[derive(Clone)]
pub struct SqliteStore {
    repos: Arc<Repos>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            repos: Arc::new(Repos {
                sessions: SessionRepo::new(db.clone()),
                messages: MessageRepo::new(db),
            }),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Repos) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repos = self.repos.clone();
        tokio::task::spawn_blocking(move || f(&repos))
            .await
            .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_session(&self, project_root: &Path) -> Result<Session, StoreError> {
        let project_root = project_root.to_path_buf();
        self.blocking(move |r| r.sessions.create(&project_root)).await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let id = id.clone();
        self.blocking(move |r| r.sessions.get(&id)).await
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Session>, StoreError> {
        self.blocking(move |r| r.sessions.list(status, limit, offset)).await
    }

    async fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        cause: Option<ErrorCause>,
    ) -> Result<Session, StoreError> {
        let id = id.clone();
        self.blocking(move |r| r.sessions.update_status(&id, status, cause.as_ref()))
            .await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let id = id.clone();
        self.blocking(move |r| r.sessions.delete(&id)).await
    }

    async fn append_message(&self, session_id: &SessionId, role: Role) -> Result<Message, StoreError> {
        let session_id = session_id.clone();
        self.blocking(move |r| r.messages.append(&session_id, role)).await
    }

    async fn append_part(
        &self,
        message_id: &MessageId,
        sequence: u32,
        payload: PartPayload,
    ) -> Result<Part, StoreError> {
        let message_id = message_id.clone();
        self.blocking(move |r| r.messages.append_part(&message_id, sequence, &payload))
            .await
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let session_id = session_id.clone();
        self.blocking(move |r| r.messages.list(&session_id)).await
    }

    async fn list_parts(&self, message_id: &MessageId) -> Result<Vec<Part>, StoreError> {
        let message_id = message_id.clone();
        self.blocking(move |r| r.messages.list_parts(&message_id)).await
    }

    async fn history(&self, session_id: &SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        let session_id = session_id.clone();
        self.blocking(move |r| r.messages.history(&session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn session_lifecycle() {
        conformance::session_lifecycle(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn part_sequencing() {
        conformance::part_sequencing(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn history_order() {
        conformance::history_order(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_appends() {
        conformance::racing_appends(Arc::new(SqliteStore::in_memory().unwrap())).await;
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tern.db");

        let sid = {
            let store = SqliteStore::open(&path).unwrap();
            let session = store.create_session(Path::new("/work")).await.unwrap();
            let m = store.append_message(&session.id, Role::User).await.unwrap();
            store.append_part(&m.id, 1, PartPayload::text("persist me")).await.unwrap();
            session.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let history = store.history(&sid).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text(), "persist me");
    }
}
