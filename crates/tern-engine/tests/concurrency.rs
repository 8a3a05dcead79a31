//! Ordering and isolation under concurrent tool dispatch and concurrent sessions.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;

use tern_core::events::Event;
use tern_core::ids::SessionId;
use tern_core::messages::{Part, PartPayload};
use tern_core::schema::{FieldType, ObjectSchema};
use tern_core::session::SessionStatus;
use tern_core::stream::ProviderDelta;
use tern_core::tools::ToolOutput;
use tern_engine::tools::create_default_registry;
use tern_engine::{Orchestrator, OrchestratorConfig, ToolRegistry};
use tern_llm::{MockProvider, MockResponse};
use tern_store::{SqliteStore, Store};

const TIMEOUT: Duration = Duration::from_secs(10);

fn nap_registry(running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> ToolRegistry {
    let mut registry = create_default_registry();
    registry.register_fn(
        "nap",
        "Sleep for a while and report which nap this was",
        ObjectSchema::new()
            .required("id", FieldType::Integer, "nap number")
            .required("ms", FieldType::Integer, "milliseconds"),
        move |args, _ctx| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ToolOutput::ok(json!({"id": args["id"]})))
            }
        },
    );
    registry
}

async fn parts_of(store: &dyn Store, session_id: &SessionId) -> Vec<Vec<Part>> {
    let mut out = Vec::new();
    for message in store.list_messages(session_id).await.unwrap() {
        out.push(store.list_parts(&message.id).await.unwrap());
    }
    out
}

fn assert_gapless(parts: &[Part]) {
    let sequences: Vec<u32> = parts.iter().map(|p| p.sequence).collect();
    let expected: Vec<u32> = (1..=parts.len() as u32).collect();
    assert_eq!(sequences, expected);
}

// ── Concurrent dispatch ──

#[tokio::test]
async fn results_follow_call_order_whatever_the_completion_order() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    // later calls finish first
    let calls: Vec<(&str, serde_json::Value)> = (0..8)
        .map(|i| ("nap", json!({"id": i, "ms": 80 - i * 10})))
        .collect();
    let orch = Orchestrator::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(MockProvider::new(vec![MockResponse::tool_calls(calls), MockResponse::text("rested")])),
        Arc::new(nap_registry(running.clone(), peak.clone())),
        OrchestratorConfig {
            tool_concurrency: 4,
            ..OrchestratorConfig::default()
        },
    );

    let session = orch.create_session(Path::new("/tmp")).await.unwrap();
    let mut events = orch.subscribe(&session.id);
    timeout(TIMEOUT, orch.run_turn(&session.id, "nap")).await.unwrap().unwrap();

    assert!(peak.load(Ordering::SeqCst) > 1, "naps overlapped");
    assert!(peak.load(Ordering::SeqCst) <= 4, "budget respected");

    let parts = parts_of(orch.store().as_ref(), &session.id).await;
    let round = &parts[1];
    assert_gapless(round);
    assert_eq!(round.len(), 17);

    let call_ids: Vec<_> = round[..8]
        .iter()
        .map(|p| match &p.payload {
            PartPayload::ToolCall { call_id, .. } => call_id.clone(),
            other => panic!("expected tool_call, got {other:?}"),
        })
        .collect();
    for (i, part) in round[8..16].iter().enumerate() {
        match &part.payload {
            PartPayload::ToolResult { call_id, output, .. } => {
                assert_eq!(call_id, &call_ids[i]);
                assert_eq!(output.as_ref().unwrap()["id"], i);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    // tool.result events come out in the same order
    let mut seen = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(50), events.next()).await {
        if let Event::ToolResult { call_id, .. } = event {
            seen.push(call_id);
        }
    }
    assert_eq!(seen, call_ids);
}

#[tokio::test]
async fn every_call_has_exactly_one_result() {
    let orch = Orchestrator::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(vec![
                ("pwd", json!({})),
                ("nonexistent", json!({})),
                ("read_file", json!({"path": "/definitely/not/here"})),
                ("list_files", json!({})),
            ]),
            MockResponse::text("ok"),
        ])),
        Arc::new(create_default_registry()),
        OrchestratorConfig::default(),
    );
    let outcome = orch.start(Path::new("/tmp"), "go").await.unwrap();

    let parts: Vec<Part> = parts_of(orch.store().as_ref(), &outcome.session_id)
        .await
        .into_iter()
        .flatten()
        .collect();
    let calls: Vec<_> = parts
        .iter()
        .filter_map(|p| match &p.payload {
            PartPayload::ToolCall { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    for call_id in &calls {
        let results = parts
            .iter()
            .filter(|p| matches!(&p.payload, PartPayload::ToolResult { call_id: c, .. } if c == call_id))
            .count();
        assert_eq!(results, 1, "call {call_id} has {results} results");
    }
    assert_eq!(calls.len(), 4);
}

#[tokio::test]
async fn idempotent_reads_give_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
    let args = json!({"path": "notes.txt"});
    let orch = Orchestrator::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(MockProvider::new(vec![
            MockResponse::tool_calls(vec![("read_file", args.clone()), ("read_file", args)]),
            MockResponse::text("same"),
        ])),
        Arc::new(create_default_registry()),
        OrchestratorConfig::default(),
    );
    let outcome = orch.start(dir.path(), "read twice").await.unwrap();

    let parts = parts_of(orch.store().as_ref(), &outcome.session_id).await;
    let outputs: Vec<_> = parts[1]
        .iter()
        .filter_map(|p| match &p.payload {
            PartPayload::ToolResult { success: true, output, .. } => output.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0], outputs[1]);
}

// ── Concurrent sessions ──

#[tokio::test]
async fn sessions_run_in_parallel_without_interference() {
    let paced = || {
        MockResponse::Paced(
            Duration::from_millis(5),
            vec![Ok(ProviderDelta::text("hi")), Ok(ProviderDelta::text(" there")), Ok(ProviderDelta::TurnEnd)],
        )
    };
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let orch = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(MockProvider::new((0..6).map(|_| paced()).collect())),
        Arc::new(create_default_registry()),
        OrchestratorConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..6 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            let root = format!("/tmp/project-{i}");
            orch.start(Path::new(&root), &format!("hello {i}")).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        let outcome = timeout(TIMEOUT, handle).await.unwrap().unwrap().unwrap();
        ids.push(outcome.session_id);
    }

    for id in &ids {
        let session = store.get_session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        let parts = parts_of(store.as_ref(), id).await;
        assert_eq!(parts.len(), 2);
        for message in &parts {
            assert_gapless(message);
            assert!(message.iter().all(|p| p.message_id == message[0].message_id));
        }
    }
    let listed = store.list_sessions(None, 100, 0).await.unwrap();
    assert_eq!(listed.len(), 6);
}
