//! Durable transcript storage: sessions, messages and their parts.
//!
//! [`Store`] is the seam the engine writes through. [`SqliteStore`] is the
//! production implementation; [`MemoryStore`] keeps everything in process
//! for tests and throwaway runs.

use std::path::Path;

use async_trait::async_trait;

use tern_core::errors::ErrorCause;
use tern_core::ids::{MessageId, SessionId};
use tern_core::messages::{HistoryEntry, Message, Part, PartPayload, Role};
use tern_core::session::{Session, SessionStatus};

#[cfg(test)]
mod conformance;
pub mod database;
pub mod error;
pub mod memory;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod sqlite;

pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, project_root: &Path) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Newest first.
    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Session>, StoreError>;

    async fn update_session_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        cause: Option<ErrorCause>,
    ) -> Result<Session, StoreError>;

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;

    async fn append_message(&self, session_id: &SessionId, role: Role) -> Result<Message, StoreError>;

    /// Atomic per message: either the part is stored with exactly
    /// `sequence` or nothing changes.
    async fn append_part(
        &self,
        message_id: &MessageId,
        sequence: u32,
        payload: PartPayload,
    ) -> Result<Part, StoreError>;

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError>;

    async fn list_parts(&self, message_id: &MessageId) -> Result<Vec<Part>, StoreError>;

    async fn history(&self, session_id: &SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = Vec::new();
        for message in self.list_messages(session_id).await? {
            let parts = self.list_parts(&message.id).await?;
            entries.push(HistoryEntry { message, parts });
        }
        Ok(entries)
    }
}
