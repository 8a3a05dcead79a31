use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tern_core::context::ToolContext;
use tern_core::errors::ProviderError;
use tern_core::events::{Event, PartDelta};
use tern_core::ids::{MessageId, SessionId};
use tern_core::messages::{AbortReason, FinishReason, Message, Part, PartPayload, Role};
use tern_core::provider::{CompletionRequest, ProviderAdapter};
use tern_core::session::{Session, SessionStatus};
use tern_core::stream::ProviderDelta;
use tern_core::tools::ToolSignal;
use tern_store::{Store, StoreError};

use crate::bus::{EventBus, EventStream};
use crate::config::OrchestratorConfig;
use crate::dispatch::{PendingCall, ToolDispatcher};
use crate::error::EngineError;
use crate::registry::ToolRegistry;

/// Where a session's current turn is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// No turn in flight.
    Idle,
    AwaitingProvider,
    StreamingText,
    DispatchingTool,
    AwaitingToolResult,
    Continuing,
    Finished,
    Errored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The provider ended its turn; the session waits for the next user input.
    AwaitingInput,
    /// The finish tool was called; the session is closed.
    Finished,
}

/// Result of a turn that did not error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub session_id: SessionId,
    pub status: TurnStatus,
    pub rounds: u32,
    pub last_message_id: Option<MessageId>,
    /// Text of the final assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Drives turns: provider stream in, persisted parts and published events out.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    provider: Arc<dyn ProviderAdapter>,
    registry: Arc<ToolRegistry>,
    bus: EventBus,
    config: OrchestratorConfig,
    active_runs: Arc<DashMap<SessionId, CancellationToken>>,
    phases: DashMap<SessionId, TurnPhase>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ProviderAdapter>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            bus: EventBus::new(config.subscriber_capacity),
            config,
            active_runs: Arc::new(DashMap::new()),
            phases: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe(&self, session_id: &SessionId) -> EventStream {
        self.bus.subscribe(session_id)
    }

    /// Create an active session and announce it.
    #[instrument(skip(self), fields(project_root = %project_root.display()))]
    pub async fn create_session(&self, project_root: &Path) -> Result<Session, EngineError> {
        let session = self.store.create_session(project_root).await?;
        info!(session_id = %session.id, "session created");
        self.bus.publish(Event::SessionCreated {
            session_id: session.id.clone(),
            project_root: session.project_root.clone(),
        });
        Ok(session)
    }

    /// Create a session and run its first turn.
    pub async fn start(&self, project_root: &Path, input: &str) -> Result<TurnOutcome, EngineError> {
        let session = self.create_session(project_root).await?;
        self.run_turn(&session.id, input).await
    }

    /// Run one user turn to completion.
    ///
    /// Rejections (`SessionNotFound`, `SessionTerminal`, `SessionBusy`) leave
    /// the session untouched. Any other error has already been recorded: the
    /// in-progress message carries an `aborted` part, the session is
    /// `errored`, and one `error` event went out.
    pub async fn run_turn(&self, session_id: &SessionId, input: &str) -> Result<TurnOutcome, EngineError> {
        let claim = self.claim_turn(session_id)?;
        self.run_claimed(claim, input).await
    }

    /// Reserve the session for one turn without starting it.
    ///
    /// Fails with `SessionBusy` while another claim is held, so a caller that
    /// hands the turn to a background task can still answer the conflict
    /// synchronously. The reservation ends when the claim is dropped.
    pub fn claim_turn(&self, session_id: &SessionId) -> Result<TurnClaim, EngineError> {
        match self.active_runs.entry(session_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::SessionBusy(session_id.clone())),
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(cancel.clone());
                Ok(TurnClaim {
                    session_id: session_id.clone(),
                    cancel,
                    runs: Arc::clone(&self.active_runs),
                })
            }
        }
    }

    /// Run a turn under a claim taken with [`Orchestrator::claim_turn`].
    #[instrument(skip_all, fields(session_id = %claim.session_id))]
    pub async fn run_claimed(&self, claim: TurnClaim, input: &str) -> Result<TurnOutcome, EngineError> {
        let session_id = &claim.session_id;
        let session = match self.store.get_session(session_id).await {
            Ok(session) => session,
            Err(StoreError::NotFound(_)) => return Err(EngineError::SessionNotFound(session_id.clone())),
            Err(e) => return Err(e.into()),
        };
        if session.status.is_terminal() {
            return Err(EngineError::SessionTerminal {
                session_id: session.id,
                status: session.status,
            });
        }

        info!("turn started");
        let mut turn = Turn {
            orch: self,
            session,
            cancel: claim.cancel.clone(),
            writer: None,
            pending: VecDeque::new(),
            rounds: 0,
        };
        match turn.drive(input).await {
            Ok(outcome) => {
                info!(status = ?outcome.status, rounds = outcome.rounds, "turn completed");
                Ok(outcome)
            }
            Err(err) => Err(turn.fail(err).await),
        }
    }

    /// Phase of the session's current turn, or of its last one if it ended
    /// the session.
    pub fn state(&self, session_id: &SessionId) -> TurnPhase {
        self.phases.get(session_id).map(|p| *p).unwrap_or(TurnPhase::Idle)
    }

    pub fn is_running(&self, session_id: &SessionId) -> bool {
        self.active_runs.contains_key(session_id)
    }

    /// Number of turns in flight across all sessions.
    pub fn running_count(&self) -> usize {
        self.active_runs.len()
    }

    /// Cancel the session's in-flight turn. Returns false when none is running.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match self.active_runs.get(session_id) {
            Some(token) => {
                info!(session_id = %session_id, "cancelling turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight turn. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active_runs.iter() {
            entry.value().cancel();
            count += 1;
        }
        if count > 0 {
            info!(count, "cancelled all turns");
        }
        count
    }

    /// Delete a session that has no turn in flight.
    ///
    /// Open event streams end, and nothing the orchestrator tracked for the
    /// session outlives it.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), EngineError> {
        let _claim = self.claim_turn(session_id)?;
        match self.store.delete_session(session_id).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(EngineError::SessionNotFound(session_id.clone())),
            Err(e) => return Err(e.into()),
        }
        self.bus.close(session_id);
        self.bus.forget(session_id);
        self.phases.remove(session_id);
        info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    fn set_phase(&self, session_id: &SessionId, phase: TurnPhase) {
        self.phases.insert(session_id.clone(), phase);
    }
}

/// Exclusive right to run one turn of a session. See [`Orchestrator::claim_turn`].
pub struct TurnClaim {
    session_id: SessionId,
    cancel: CancellationToken,
    runs: Arc<DashMap<SessionId, CancellationToken>>,
}

impl TurnClaim {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for TurnClaim {
    fn drop(&mut self) {
        self.runs.remove(&self.session_id);
    }
}

enum RoundEnd {
    EndTurn,
    ToolUse,
    Finished { summary: Option<String> },
}

/// The assistant message of the current round and its next sequence number.
struct PartWriter {
    message: Message,
    next_sequence: u32,
    sealed: bool,
    text: String,
}

impl PartWriter {
    fn new(message: Message) -> Self {
        Self {
            message,
            next_sequence: 1,
            sealed: false,
            text: String::new(),
        }
    }

    fn committed(&self) -> u32 {
        self.next_sequence - 1
    }
}

/// State of one running turn.
struct Turn<'a> {
    orch: &'a Orchestrator,
    session: Session,
    cancel: CancellationToken,
    writer: Option<PartWriter>,
    /// Spawned tool calls of the current round, in received order.
    pending: VecDeque<PendingCall>,
    rounds: u32,
}

impl Turn<'_> {
    fn session_id(&self) -> &SessionId {
        &self.session.id
    }

    fn publish(&self, event: Event) {
        self.orch.bus.publish(event);
    }

    fn set_phase(&self, phase: TurnPhase) {
        self.orch.set_phase(&self.session.id, phase);
    }

    async fn drive(&mut self, input: &str) -> Result<TurnOutcome, EngineError> {
        let orch = self.orch;
        let store = &orch.store;
        let user = store.append_message(self.session_id(), Role::User).await?;
        self.publish(Event::MessageCreated {
            session_id: self.session.id.clone(),
            message_id: user.id.clone(),
            role: Role::User,
            index: user.index,
        });
        let part = store.append_part(&user.id, 1, PartPayload::text(input)).await?;
        if let Some(event) = Event::for_part(self.session_id(), &part) {
            self.publish(event);
        }

        let max_rounds = orch.config.max_rounds;
        loop {
            if self.rounds >= max_rounds {
                return Err(EngineError::TurnLimitExceeded(max_rounds));
            }
            self.rounds += 1;

            match self.round().await? {
                RoundEnd::ToolUse => {
                    self.set_phase(TurnPhase::Continuing);
                }
                RoundEnd::EndTurn => {
                    self.set_phase(TurnPhase::Idle);
                    return Ok(self.outcome(TurnStatus::AwaitingInput, None));
                }
                RoundEnd::Finished { summary } => {
                    store
                        .update_session_status(self.session_id(), SessionStatus::Finished, None)
                        .await?;
                    self.set_phase(TurnPhase::Finished);
                    orch.bus.close(self.session_id());
                    return Ok(self.outcome(TurnStatus::Finished, summary));
                }
            }
        }
    }

    fn outcome(&self, status: TurnStatus, summary: Option<String>) -> TurnOutcome {
        TurnOutcome {
            session_id: self.session.id.clone(),
            status,
            rounds: self.rounds,
            last_message_id: self.writer.as_ref().map(|w| w.message.id.clone()),
            text: self
                .writer
                .as_ref()
                .map(|w| w.text.clone())
                .filter(|t| !t.is_empty()),
            summary,
        }
    }

    /// One provider round, retried while nothing of it has been persisted.
    async fn round(&mut self) -> Result<RoundEnd, EngineError> {
        let orch = self.orch;
        let policy = &orch.config.retry;
        self.writer = None;
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            match self.attempt().await {
                Ok(end) => return Ok(end),
                Err(EngineError::Provider(e)) => {
                    let committed = self.writer.as_ref().map_or(0, PartWriter::committed);
                    if committed == 0 && policy.should_retry(&e, attempt) {
                        let delay = policy.delay_for(attempt, e.suggested_delay());
                        warn!(
                            session_id = %self.session.id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "transient provider error, retrying round"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt += 1;
                        continue;
                    }
                    return Err(EngineError::Provider(e.escalate(attempt + 1)));
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn attempt(&mut self) -> Result<RoundEnd, EngineError> {
        self.set_phase(TurnPhase::AwaitingProvider);
        let orch = self.orch;
        let config = &orch.config;
        let timeout = config.provider_timeout;

        let history = orch
            .store
            .history(self.session_id())
            .await?
            .into_iter()
            .filter(|entry| !entry.parts.is_empty())
            .collect();
        let request = CompletionRequest {
            history,
            tools: orch.registry.schemas(),
            project_root: self.session.project_root.clone(),
        };

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            r = tokio::time::timeout(timeout, orch.provider.stream_completion(&request)) => r,
        };
        let mut stream = match opened {
            Ok(stream) => stream?,
            Err(_) => return Err(ProviderError::Timeout(timeout).into()),
        };

        let dispatcher = ToolDispatcher::new(
            Arc::clone(&orch.registry),
            config.tool_concurrency,
            config.tool_timeout,
            config.max_tool_output_bytes,
        );
        let mut text = String::new();

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                r = tokio::time::timeout(timeout, stream.next()) => r,
            };
            let delta = match next {
                Err(_) => return Err(ProviderError::Timeout(timeout).into()),
                Ok(None) => {
                    return Err(ProviderError::StreamInterrupted("stream ended before turn end".into()).into())
                }
                Ok(Some(delta)) => delta?,
            };
            if config.trace_deltas {
                debug!(session_id = %self.session.id, delta = ?delta, "provider delta");
            }

            match delta {
                ProviderDelta::TextDelta { text: fragment } => {
                    let message_id = self.ensure_message().await?;
                    self.set_phase(TurnPhase::StreamingText);
                    text.push_str(&fragment);
                    self.publish(Event::MessagePartDelta {
                        session_id: self.session.id.clone(),
                        message_id,
                        delta: PartDelta::Text { text: fragment },
                    });
                }
                ProviderDelta::ToolCallDelta {
                    call_id,
                    arguments_delta,
                } => {
                    let message_id = self.ensure_message().await?;
                    self.publish(Event::ToolDelta {
                        session_id: self.session.id.clone(),
                        message_id,
                        call_id,
                        arguments_delta,
                    });
                }
                ProviderDelta::ToolCallComplete {
                    call_id,
                    name,
                    arguments,
                } => {
                    self.ensure_message().await?;
                    self.flush_text(&mut text).await?;
                    self.set_phase(TurnPhase::DispatchingTool);
                    self.append(PartPayload::ToolCall {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    })
                    .await?;

                    let mut ctx = ToolContext::new(self.session.id.clone(), call_id, self.session.project_root.clone());
                    ctx.env = config.tool_env.clone();
                    ctx.cancel = self.cancel.child_token();
                    self.pending.push_back(dispatcher.spawn(name, arguments, ctx));
                }
                ProviderDelta::TurnEnd => {
                    self.ensure_message().await?;
                    self.flush_text(&mut text).await?;
                    break;
                }
            }
        }

        self.collect_results().await
    }

    /// Persist each call's result in received order, then seal the message.
    async fn collect_results(&mut self) -> Result<RoundEnd, EngineError> {
        if self.pending.is_empty() {
            self.seal(FinishReason::EndTurn, None).await?;
            return Ok(RoundEnd::EndTurn);
        }

        self.set_phase(TurnPhase::AwaitingToolResult);
        let mut finish: Option<Option<String>> = None;

        while let Some(call) = self.pending.front_mut() {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                outcome = call.join() => outcome,
            };
            let Some(call) = self.pending.pop_front() else {
                break;
            };
            match outcome.into_result(call.call_id.clone()) {
                Ok((payload, signal)) => {
                    self.append(payload).await?;
                    if let Some(ToolSignal::Finish { summary }) = signal {
                        finish = Some(summary);
                    }
                }
                Err(message) => {
                    return Err(EngineError::ToolInfrastructure {
                        tool: call.name,
                        message,
                    })
                }
            }
        }

        match finish {
            Some(summary) => {
                self.seal(FinishReason::Finished, summary.clone()).await?;
                Ok(RoundEnd::Finished { summary })
            }
            None => {
                self.seal(FinishReason::ToolUse, None).await?;
                Ok(RoundEnd::ToolUse)
            }
        }
    }

    /// Create the round's assistant message on first use.
    async fn ensure_message(&mut self) -> Result<MessageId, EngineError> {
        if let Some(writer) = &self.writer {
            return Ok(writer.message.id.clone());
        }
        let message = self
            .orch
            .store
            .append_message(self.session_id(), Role::Assistant)
            .await?;
        debug!(session_id = %self.session.id, message_id = %message.id, "assistant message created");
        self.publish(Event::MessageCreated {
            session_id: self.session.id.clone(),
            message_id: message.id.clone(),
            role: Role::Assistant,
            index: message.index,
        });
        let id = message.id.clone();
        self.writer = Some(PartWriter::new(message));
        Ok(id)
    }

    async fn flush_text(&mut self, text: &mut String) -> Result<(), EngineError> {
        if text.is_empty() {
            return Ok(());
        }
        self.append(PartPayload::text(std::mem::take(text))).await?;
        Ok(())
    }

    /// Persist the next part of the in-progress message and announce it.
    async fn append(&mut self, payload: PartPayload) -> Result<Part, EngineError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EngineError::Internal("no assistant message in progress".into()))?;
        let part = self
            .orch
            .store
            .append_part(&writer.message.id, writer.next_sequence, payload)
            .await?;
        writer.next_sequence += 1;
        match &part.payload {
            PartPayload::Text { text } => writer.text.push_str(text),
            p if p.is_terminal() => writer.sealed = true,
            _ => {}
        }
        if let Some(event) = Event::for_part(&self.session.id, &part) {
            self.publish(event);
        }
        Ok(part)
    }

    async fn seal(&mut self, reason: FinishReason, summary: Option<String>) -> Result<(), EngineError> {
        let part = self
            .append(PartPayload::Finish {
                reason,
                summary: summary.clone(),
            })
            .await?;
        let text = self
            .writer
            .as_ref()
            .map(|w| w.text.clone())
            .filter(|t| !t.is_empty());
        self.publish(Event::MessageCompleted {
            session_id: self.session.id.clone(),
            message_id: part.message_id,
            reason,
            text,
            summary,
        });
        Ok(())
    }

    /// Record a failed turn as far as the store allows and return the error.
    async fn fail(&mut self, err: EngineError) -> EngineError {
        self.set_phase(TurnPhase::Errored);
        let cancelled = matches!(err, EngineError::Cancelled);

        let pending: Vec<PendingCall> = self.pending.drain(..).collect();
        for call in &pending {
            call.abort();
        }
        if cancelled {
            for call in pending {
                let payload = PartPayload::tool_failure(call.call_id.clone(), "Cancelled", "turn cancelled");
                if let Err(e) = self.append(payload).await {
                    warn!(session_id = %self.session.id, call_id = %call.call_id, error = %e, "failed to record cancelled tool result");
                    break;
                }
            }
        }

        // A cancel between rounds or before the first delta still marks the cut.
        if cancelled && self.writer.as_ref().map_or(true, |w| w.sealed) {
            self.writer = None;
            if let Err(e) = self.ensure_message().await {
                warn!(session_id = %self.session.id, error = %e, "failed to open message for aborted marker");
            }
        }

        let mut message_id = None;
        if let Some(writer) = self.writer.as_ref().filter(|w| !w.sealed) {
            message_id = Some(writer.message.id.clone());
            let reason = if cancelled {
                AbortReason::Cancelled
            } else {
                AbortReason::Error
            };
            let marker = PartPayload::Aborted {
                reason,
                detail: err.to_string(),
            };
            if let Err(e) = self.append(marker).await {
                warn!(session_id = %self.session.id, error = %e, "failed to write aborted marker");
            }
        }

        let cause = err.cause();
        if let Err(e) = self
            .orch
            .store
            .update_session_status(self.session_id(), SessionStatus::Errored, Some(cause.clone()))
            .await
        {
            error!(session_id = %self.session.id, error = %e, "failed to mark session errored");
        }
        error!(session_id = %self.session.id, kind = %cause.kind, error = %err, "turn failed");

        self.publish(Event::Error {
            session_id: self.session.id.clone(),
            message_id,
            cause,
        });
        self.orch.bus.close(self.session_id());
        err
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        for call in &self.pending {
            call.abort();
        }
    }
}
