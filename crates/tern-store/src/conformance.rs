//! Behaviour every `Store` implementation must share. Each implementation's
//! test module runs these against a fresh instance.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tern_core::errors::ErrorCause;
use tern_core::ids::SessionId;
use tern_core::messages::{AbortReason, FinishReason, PartPayload, Role};
use tern_core::session::SessionStatus;

use crate::error::StoreError;
use crate::Store;

pub async fn session_lifecycle(store: &dyn Store) {
    let a = store.create_session(Path::new("/a")).await.unwrap();
    let b = store.create_session(Path::new("/b")).await.unwrap();
    assert_eq!(store.get_session(&a.id).await.unwrap(), a);

    let cause = ErrorCause::new("Cancelled", "stopped");
    let errored = store
        .update_session_status(&b.id, SessionStatus::Errored, Some(cause.clone()))
        .await
        .unwrap();
    assert_eq!(errored.error, Some(cause));

    let active = store.list_sessions(Some(SessionStatus::Active), 10, 0).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, a.id);

    let all = store.list_sessions(None, 10, 0).await.unwrap();
    assert_eq!(all[0].id, b.id, "newest first");
    assert_eq!(store.list_sessions(None, 10, 1).await.unwrap().len(), 1);

    store.delete_session(&a.id).await.unwrap();
    assert!(matches!(store.get_session(&a.id).await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.get_session(&SessionId::from_raw("ses_none")).await,
        Err(StoreError::NotFound(_))
    ));
}

pub async fn part_sequencing(store: &dyn Store) {
    let s = store.create_session(Path::new("/tmp")).await.unwrap();
    let m = store.append_message(&s.id, Role::Assistant).await.unwrap();

    store.append_part(&m.id, 1, PartPayload::text("a")).await.unwrap();
    let err = store.append_part(&m.id, 3, PartPayload::text("c")).await.unwrap_err();
    assert!(matches!(err, StoreError::SequenceConflict { expected: 2, actual: 3, .. }));

    store
        .append_part(
            &m.id,
            2,
            PartPayload::Aborted {
                reason: AbortReason::Error,
                detail: "boom".into(),
            },
        )
        .await
        .unwrap();
    let err = store.append_part(&m.id, 3, PartPayload::text("late")).await.unwrap_err();
    assert!(matches!(err, StoreError::MessageSealed(_)));

    let parts = store.list_parts(&m.id).await.unwrap();
    let seqs: Vec<u32> = parts.iter().map(|p| p.sequence).collect();
    assert_eq!(seqs, vec![1, 2]);
}

pub async fn history_order(store: &dyn Store) {
    let s = store.create_session(Path::new("/tmp")).await.unwrap();
    let user = store.append_message(&s.id, Role::User).await.unwrap();
    store.append_part(&user.id, 1, PartPayload::text("question")).await.unwrap();
    let reply = store.append_message(&s.id, Role::Assistant).await.unwrap();
    store.append_part(&reply.id, 1, PartPayload::text("answer")).await.unwrap();
    store
        .append_part(
            &reply.id,
            2,
            PartPayload::Finish {
                reason: FinishReason::EndTurn,
                summary: None,
            },
        )
        .await
        .unwrap();

    let messages = store.list_messages(&s.id).await.unwrap();
    let indices: Vec<u32> = messages.iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![1, 2]);

    let history = store.history(&s.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message.role, Role::User);
    assert_eq!(history[0].text(), "question");
    assert_eq!(history[1].text(), "answer");
    assert!(history[1].is_sealed());
}

/// Many writers race for the same sequence numbers on one message: each
/// sequence is won exactly once and the result stays gapless. Writers on
/// other sessions are unaffected.
pub async fn racing_appends(store: Arc<dyn Store>) {
    let s = store.create_session(Path::new("/tmp")).await.unwrap();
    let m = store.append_message(&s.id, Role::Assistant).await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..8 {
        let store = store.clone();
        let message_id = m.id.clone();
        handles.push(tokio::spawn(async move {
            let mut won = Vec::new();
            for seq in 1..=20u32 {
                match store
                    .append_part(&message_id, seq, PartPayload::text(format!("w{writer}-{seq}")))
                    .await
                {
                    Ok(part) => won.push(part.sequence),
                    Err(StoreError::SequenceConflict { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            won
        }));
    }

    let mut other_sessions = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        other_sessions.push(tokio::spawn(async move {
            let s = store.create_session(Path::new("/other")).await.unwrap();
            let m = store.append_message(&s.id, Role::User).await.unwrap();
            for seq in 1..=5 {
                store.append_part(&m.id, seq, PartPayload::text("x")).await.unwrap();
            }
            store.list_parts(&m.id).await.unwrap().len()
        }));
    }

    let mut all_won = Vec::new();
    for h in handles {
        all_won.extend(h.await.unwrap());
    }
    for h in other_sessions {
        assert_eq!(h.await.unwrap(), 5);
    }

    let unique: HashSet<u32> = all_won.iter().copied().collect();
    assert_eq!(unique.len(), all_won.len(), "a sequence was written twice");

    let seqs: Vec<u32> = store
        .list_parts(&m.id)
        .await
        .unwrap()
        .iter()
        .map(|p| p.sequence)
        .collect();
    let expected: Vec<u32> = (1..=seqs.len() as u32).collect();
    assert_eq!(seqs, expected);
    assert!(!seqs.is_empty());
}
