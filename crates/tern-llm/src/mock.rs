use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use tern_core::errors::ProviderError;
use tern_core::provider::{CompletionRequest, ProviderAdapter};
use tern_core::stream::{DeltaStream, ProviderDelta};

/// Pre-programmed responses for deterministic testing.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of deltas (or mid-stream errors).
    Stream(Vec<Result<ProviderDelta, ProviderError>>),
    /// Yield deltas with a pause before each one.
    Paced(Duration, Vec<Result<ProviderDelta, ProviderError>>),
    /// Yield the given deltas, then never yield again.
    StreamThenHang(Vec<ProviderDelta>),
    /// Return an error from `stream_completion` itself.
    Error(ProviderError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never return from `stream_completion`.
    Hang,
}

impl MockResponse {
    /// A round that streams `text` and ends the turn.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![Ok(ProviderDelta::text(text)), Ok(ProviderDelta::TurnEnd)])
    }

    /// A round that streams `text` in the given fragments.
    pub fn text_chunks(chunks: &[&str]) -> Self {
        let mut deltas: Vec<_> = chunks.iter().map(|c| Ok(ProviderDelta::text(*c))).collect();
        deltas.push(Ok(ProviderDelta::TurnEnd));
        Self::Stream(deltas)
    }

    /// A round that requests a single tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    /// A round that requests several tool calls in order.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        let mut deltas: Vec<_> = calls
            .into_iter()
            .map(|(name, args)| Ok(ProviderDelta::tool_call(name, args)))
            .collect();
        deltas.push(Ok(ProviderDelta::TurnEnd));
        Self::Stream(deltas)
    }

    /// A round that streams some text then fails mid-stream.
    pub fn text_then_error(text: &str, error: ProviderError) -> Self {
        Self::Stream(vec![Ok(ProviderDelta::text(text)), Err(error)])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in order and records
/// every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<DeltaStream, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(response) = self.responses.lock().pop_front() else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<DeltaStream, ProviderError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(items) => return Ok(Box::pin(stream::iter(items))),
            MockResponse::Paced(pause, items) => {
                let s = stream::iter(items).then(move |item| async move {
                    tokio::time::sleep(pause).await;
                    item
                });
                return Ok(Box::pin(s));
            }
            MockResponse::StreamThenHang(deltas) => {
                let s = stream::iter(deltas.into_iter().map(Ok))
                    .chain(stream::pending::<Result<ProviderDelta, ProviderError>>());
                return Ok(Box::pin(s));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockResponse::Hang => {
                futures::future::pending::<()>().await;
            }
        }
    }
}
