use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tern_core::context::ToolContext;
use tern_core::ids::ToolCallId;
use tern_core::messages::{PartPayload, ToolErrorInfo};
use tern_core::tools::{ExecutionMode, ToolSignal};

use crate::registry::{InvokeError, ToolRegistry};
use crate::truncate;

/// How a dispatched call resolved.
#[derive(Debug)]
pub enum ToolOutcome {
    Completed {
        success: bool,
        output: Value,
        signal: Option<ToolSignal>,
    },
    Failed {
        kind: String,
        message: String,
    },
    /// Fatal to the turn.
    Infrastructure(String),
}

impl ToolOutcome {
    pub fn failed(kind: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::failed("Cancelled", "tool call cancelled")
    }

    /// The `tool_result` payload to persist, plus any side-effect signal.
    /// Infrastructure failures have no payload and end the turn instead.
    pub fn into_result(self, call_id: ToolCallId) -> Result<(PartPayload, Option<ToolSignal>), String> {
        match self {
            Self::Completed {
                success: true,
                output,
                signal,
            } => Ok((
                PartPayload::ToolResult {
                    call_id,
                    success: true,
                    output: Some(output),
                    error: None,
                },
                signal,
            )),
            Self::Completed { output, signal, .. } => {
                let message = match &output {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok((
                    PartPayload::ToolResult {
                        call_id,
                        success: false,
                        output: Some(output),
                        error: Some(ToolErrorInfo {
                            kind: "ToolFailed".into(),
                            message,
                        }),
                    },
                    signal,
                ))
            }
            Self::Failed { kind, message } => Ok((PartPayload::tool_failure(call_id, kind, message), None)),
            Self::Infrastructure(message) => Err(message),
        }
    }
}

/// A spawned tool call, joined in the order it was received.
pub struct PendingCall {
    pub call_id: ToolCallId,
    pub name: String,
    handle: JoinHandle<ToolOutcome>,
    cancel: CancellationToken,
}

impl PendingCall {
    /// Wait for the call. Must not be called again after it returns.
    pub async fn join(&mut self) -> ToolOutcome {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => ToolOutcome::cancelled(),
            Err(e) => {
                error!(tool = %self.name, call_id = %self.call_id, error = %e, "tool task failed");
                ToolOutcome::failed("ToolPanicked", "internal error: tool task failed")
            }
        }
    }

    /// Signal the handler to stop and abort its task.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Spawns the tool calls of one provider round under a shared concurrency
/// budget. Concurrent tools take one permit each; sequential tools take the
/// whole budget and so never overlap another call.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
    budget: u32,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, budget: u32, timeout: Duration, max_output_bytes: usize) -> Self {
        let budget = budget.max(1);
        Self {
            registry,
            permits: Arc::new(Semaphore::new(budget as usize)),
            budget,
            timeout,
            max_output_bytes,
        }
    }

    /// Start a call now. The handler gets a child of `ctx.cancel`.
    pub fn spawn(&self, name: String, arguments: Value, mut ctx: ToolContext) -> PendingCall {
        let cancel = ctx.cancel.child_token();
        ctx.cancel = cancel.clone();
        let call_id = ctx.call_id.clone();

        let registry = Arc::clone(&self.registry);
        let permits = Arc::clone(&self.permits);
        let mode = registry.execution_mode(&name);
        let budget = self.budget;
        let timeout = self.timeout;
        let max_output_bytes = self.max_output_bytes;
        let tool = name.clone();

        let handle = tokio::spawn(async move {
            let _permit = match mode {
                Some(ExecutionMode::Sequential) => permits.acquire_many_owned(budget).await.ok(),
                Some(ExecutionMode::Concurrent) => permits.acquire_owned().await.ok(),
                None => None,
            };
            if ctx.cancel.is_cancelled() {
                return ToolOutcome::cancelled();
            }

            debug!(tool = %tool, call_id = %ctx.call_id, "tool started");
            let started = Instant::now();
            let invocation = AssertUnwindSafe(registry.invoke(&tool, arguments, &ctx)).catch_unwind();
            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => return ToolOutcome::cancelled(),
                r = tokio::time::timeout(timeout, invocation) => r,
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(Ok(out))) => {
                    info!(tool = %tool, call_id = %ctx.call_id, success = out.success, duration_ms, "tool finished");
                    ToolOutcome::Completed {
                        success: out.success,
                        output: truncate::truncate_value(out.output, max_output_bytes),
                        signal: out.signal,
                    }
                }
                Ok(Ok(Err(InvokeError::Infrastructure(message)))) => {
                    error!(tool = %tool, call_id = %ctx.call_id, error = %message, "tool infrastructure failure");
                    ToolOutcome::Infrastructure(message)
                }
                Ok(Ok(Err(e))) => {
                    info!(tool = %tool, call_id = %ctx.call_id, kind = e.kind(), error = %e, duration_ms, "tool failed");
                    ToolOutcome::failed(e.kind(), e.to_string())
                }
                Ok(Err(panic)) => {
                    let msg = panic_message(&panic);
                    error!(tool = %tool, call_id = %ctx.call_id, panic = %msg, "tool panicked during execution");
                    ToolOutcome::failed("ToolPanicked", format!("internal error: tool crashed: {msg}"))
                }
                Err(_) => {
                    warn!(tool = %tool, call_id = %ctx.call_id, timeout_ms = timeout.as_millis() as u64, "tool timed out");
                    ToolOutcome::failed("Timeout", format!("tool timed out after {}ms", timeout.as_millis()))
                }
            }
        });

        PendingCall {
            call_id,
            name,
            handle,
            cancel,
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;
    use tern_core::ids::SessionId;
    use tern_core::schema::{FieldType, ObjectSchema};
    use tern_core::tools::{ToolError, ToolOutput};

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::new(), ToolCallId::new(), "/tmp")
    }

    fn dispatcher(registry: ToolRegistry, budget: u32) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(registry), budget, Duration::from_secs(5), 1024)
    }

    fn sleepy(reg: &mut ToolRegistry, name: &str, ms: u64) {
        reg.register_fn(
            name,
            "sleeps then echoes",
            ObjectSchema::new().allow_additional(),
            move |args, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(ToolOutput::ok(args))
            },
        );
    }

    #[tokio::test]
    async fn joins_in_received_order() {
        let mut reg = ToolRegistry::new();
        sleepy(&mut reg, "slow", 80);
        sleepy(&mut reg, "fast", 1);
        let d = dispatcher(reg, 4);

        let mut calls = vec![
            d.spawn("slow".into(), json!({"n": 1}), ctx()),
            d.spawn("fast".into(), json!({"n": 2}), ctx()),
        ];
        let mut seen = Vec::new();
        for call in &mut calls {
            match call.join().await {
                ToolOutcome::Completed { output, .. } => seen.push(output["n"].as_u64().unwrap()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut reg = ToolRegistry::new();
        {
            let running = running.clone();
            let peak = peak.clone();
            reg.register_fn("overlap", "tracks overlap", ObjectSchema::new(), move |_args, _ctx| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(ToolOutput::ok(Value::Null))
                }
            });
        }
        let d = dispatcher(reg, 2);
        let mut calls: Vec<_> = (0..6).map(|_| d.spawn("overlap".into(), Value::Null, ctx())).collect();
        for call in &mut calls {
            call.join().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let d = dispatcher(ToolRegistry::new(), 2);
        let outcome = d.spawn("delete_universe".into(), json!({}), ctx()).join().await;
        let (payload, _) = outcome.into_result(ToolCallId::from_raw("call_1")).unwrap();
        match payload {
            PartPayload::ToolResult { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.unwrap().kind, "UnknownTool");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let mut reg = ToolRegistry::new();
        reg.register_fn("explode", "panics", ObjectSchema::new(), |_args, _ctx| async move {
            if true {
                panic!("kaboom");
            }
            Ok(ToolOutput::ok(Value::Null))
        });
        let d = dispatcher(reg, 1);
        match d.spawn("explode".into(), Value::Null, ctx()).join().await {
            ToolOutcome::Failed { kind, message } => {
                assert_eq!(kind, "ToolPanicked");
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_non_fatal() {
        let mut reg = ToolRegistry::new();
        sleepy(&mut reg, "forever", 60_000);
        let d = ToolDispatcher::new(Arc::new(reg), 1, Duration::from_millis(20), 1024);
        match d.spawn("forever".into(), Value::Null, ctx()).join().await {
            ToolOutcome::Failed { kind, .. } => assert_eq!(kind, "Timeout"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn abort_yields_cancelled() {
        let mut reg = ToolRegistry::new();
        sleepy(&mut reg, "forever", 60_000);
        let d = dispatcher(reg, 1);
        let mut call = d.spawn("forever".into(), Value::Null, ctx());
        call.abort();
        match call.join().await {
            ToolOutcome::Failed { kind, .. } => assert_eq!(kind, "Cancelled"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn infrastructure_has_no_payload() {
        let mut reg = ToolRegistry::new();
        reg.register_fn(
            "broken",
            "infra failure",
            ObjectSchema::new().optional("x", FieldType::Integer, "unused"),
            |_args, _ctx| async move { Err(ToolError::Infrastructure("disk gone".into())) },
        );
        let d = dispatcher(reg, 1);
        let outcome = d.spawn("broken".into(), json!({}), ctx()).join().await;
        assert_eq!(outcome.into_result(ToolCallId::new()).unwrap_err(), "disk gone");
    }

    #[tokio::test]
    async fn output_is_truncated() {
        let mut reg = ToolRegistry::new();
        reg.register_fn("big", "large output", ObjectSchema::new(), |_args, _ctx| async move {
            Ok(ToolOutput::ok("z".repeat(5000)))
        });
        let d = dispatcher(reg, 1);
        match d.spawn("big".into(), Value::Null, ctx()).join().await {
            ToolOutcome::Completed { output, .. } => {
                assert!(output.as_str().unwrap().contains("[truncated: 5000 bytes -> 1024 bytes]"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
