use async_trait::async_trait;
use futures::stream;

use tern_core::errors::ProviderError;
use tern_core::messages::Role;
use tern_core::provider::{CompletionRequest, ProviderAdapter};
use tern_core::stream::{DeltaStream, ProviderDelta};

/// Replies with the latest user message, streamed word by word.
pub struct EchoProvider;

#[async_trait]
impl ProviderAdapter for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<DeltaStream, ProviderError> {
        let last_user = request
            .history
            .iter()
            .rev()
            .find(|entry| entry.message.role == Role::User)
            .map(|entry| entry.text())
            .ok_or_else(|| ProviderError::InvalidRequest("no user message to echo".into()))?;

        let mut deltas: Vec<Result<ProviderDelta, ProviderError>> = last_user
            .split_inclusive(' ')
            .map(|word| Ok(ProviderDelta::text(word)))
            .collect();
        deltas.push(Ok(ProviderDelta::TurnEnd));
        Ok(Box::pin(stream::iter(deltas)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use std::path::PathBuf;
    use tern_core::ids::{MessageId, PartId, SessionId};
    use tern_core::messages::{HistoryEntry, Message, Part, PartPayload};

    fn user_entry(text: &str) -> HistoryEntry {
        let message_id = MessageId::new();
        HistoryEntry {
            message: Message {
                id: message_id.clone(),
                session_id: SessionId::new(),
                index: 1,
                role: Role::User,
                created_at: Utc::now(),
            },
            parts: vec![Part {
                id: PartId::new(),
                message_id,
                sequence: 1,
                payload: PartPayload::text(text),
                created_at: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn echoes_word_by_word() {
        let request = CompletionRequest {
            history: vec![user_entry("hello there world")],
            tools: Vec::new(),
            project_root: PathBuf::from("/tmp"),
        };
        let deltas: Vec<_> = EchoProvider.stream_completion(&request).await.unwrap().collect().await;
        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0], Ok(ProviderDelta::text("hello ")));
        assert_eq!(deltas[2], Ok(ProviderDelta::text("world")));
        assert_eq!(deltas[3], Ok(ProviderDelta::TurnEnd));
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let request = CompletionRequest {
            history: Vec::new(),
            tools: Vec::new(),
            project_root: PathBuf::from("/tmp"),
        };
        assert!(EchoProvider.stream_completion(&request).await.is_err());
    }
}
