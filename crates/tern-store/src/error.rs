use tern_core::ids::MessageId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `append_part` was called with a sequence other than last + 1.
    #[error("sequence conflict on {message_id}: expected {expected}, got {actual}")]
    SequenceConflict {
        message_id: MessageId,
        expected: u32,
        actual: u32,
    },

    /// The message already ends in a terminal part.
    #[error("message {0} is sealed")]
    MessageSealed(MessageId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Short classification string, used as the error cause kind.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SequenceConflict { .. } => "SequenceConflict",
            Self::MessageSealed(_) => "MessageSealed",
            Self::NotFound(_) => "NotFound",
            Self::Database(_) => "DatabaseError",
            Self::Serialization(_) => "SerializationError",
            Self::CorruptRow { .. } => "CorruptRow",
            Self::Io(_) => "IoError",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
