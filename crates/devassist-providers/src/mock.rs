//! Scriptable provider for exercising orchestration without network calls.
//!
//! Outcomes are queued per provider and consumed one per call; once the
//! queue is empty every call succeeds with a canned reply. Each call is
//! recorded with the (virtual) time it was made so tests can assert on
//! retry spacing under a paused Tokio clock.

use core::time::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devassist_core::sync::IgnoreLock as _;
use devassist_core::{
    HealthStatus, LlmProvider, ModelDescriptor, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse, TextStream, TokenUsage, estimate_tokens,
};
use futures::{StreamExt as _, future, stream};
use tokio::time::{Instant, sleep};

use crate::factory::{filter_catalog, vendor_catalog};

/// How a scripted stream ends after its chunks.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// The stream finishes normally.
    Complete,
    /// The stream yields this error and stops.
    Fail(ProviderError),
    /// The stream never yields again.
    Stall,
}

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this text.
    Reply(String),
    /// Fail with this error.
    Fail(ProviderError),
    /// Never answer.
    Hang,
    /// Answer after a delay.
    Delayed(Duration, Box<MockOutcome>),
    /// Stream these pieces, then end as described.
    Stream(Vec<String>, StreamEnd),
}

/// A call the mock received.
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Requested model.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Completion token cap sent.
    pub max_tokens: u32,
    /// Whether the call opened a stream.
    pub streamed: bool,
    /// When the call arrived.
    pub at: Instant,
}

/// Mock provider with a scripted outcome queue and call history.
#[derive(Clone)]
pub struct MockProvider {
    kind: ProviderKind,
    catalog: Vec<ModelDescriptor>,
    outcomes: Arc<Mutex<VecDeque<MockOutcome>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    healthy: bool,
}

impl MockProvider {
    /// Mock serving the vendor's full pricing table.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            catalog: vendor_catalog(kind),
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            healthy: true,
        }
    }

    /// Restricts the catalog to the named vendor models, in order.
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = models.into_iter().map(Into::into).collect();
        self.catalog = filter_catalog(vendor_catalog(self.kind), Some(&names));
        self
    }

    /// Serves no models at all.
    #[must_use]
    pub fn without_models(mut self) -> Self {
        self.catalog.clear();
        self
    }

    /// Makes health checks report the provider as down.
    #[must_use]
    pub const fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Queues an outcome.
    #[must_use]
    pub fn then(self, outcome: MockOutcome) -> Self {
        self.push(outcome);
        self
    }

    /// Queues a successful reply.
    #[must_use]
    pub fn then_reply<S: Into<String>>(self, text: S) -> Self {
        self.then(MockOutcome::Reply(text.into()))
    }

    /// Queues a failure.
    #[must_use]
    pub fn then_fail(self, error: ProviderError) -> Self {
        self.then(MockOutcome::Fail(error))
    }

    /// Queues an outcome on a shared handle.
    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock_ignore_poison().push_back(outcome);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock_ignore_poison().clone()
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock_ignore_poison().len()
    }

    fn record(&self, request: &ProviderRequest, streamed: bool) -> MockOutcome {
        self.calls.lock_ignore_poison().push(MockCall {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            system_prompt: request.system_prompt.clone(),
            max_tokens: request.max_tokens,
            streamed,
            at: Instant::now(),
        });
        self.outcomes
            .lock_ignore_poison()
            .pop_front()
            .unwrap_or_else(|| {
                MockOutcome::Reply(format!("mock response from {}/{}", self.kind, request.model))
            })
    }

    fn response_for(request: &ProviderRequest, text: String) -> ProviderResponse {
        let prompt_tokens = estimate_tokens(&request.prompt)
            + request.system_prompt.as_deref().map_or(0, estimate_tokens);
        ProviderResponse {
            usage: TokenUsage::new(prompt_tokens, estimate_tokens(&text)),
            content: text,
            metadata: HashMap::new(),
        }
    }

    async fn resolve(outcome: MockOutcome) -> MockOutcome {
        let mut current = outcome;
        while let MockOutcome::Delayed(delay, inner) = current {
            sleep(delay).await;
            current = *inner;
        }
        if matches!(current, MockOutcome::Hang) {
            future::pending::<()>().await;
        }
        current
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model_catalog(&self) -> Vec<ModelDescriptor> {
        self.catalog.clone()
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match Self::resolve(self.record(request, false)).await {
            MockOutcome::Reply(text) => Ok(Self::response_for(request, text)),
            MockOutcome::Stream(chunks, _) => Ok(Self::response_for(request, chunks.concat())),
            MockOutcome::Fail(error) => Err(error),
            MockOutcome::Hang | MockOutcome::Delayed(..) => Err(ProviderError::Failed(
                "mock outcome did not resolve".to_owned(),
            )),
        }
    }

    async fn generate_stream(&self, request: &ProviderRequest) -> Result<TextStream, ProviderError> {
        let (chunks, end) = match Self::resolve(self.record(request, true)).await {
            MockOutcome::Reply(text) => (vec![text], StreamEnd::Complete),
            MockOutcome::Stream(chunks, end) => (chunks, end),
            MockOutcome::Fail(error) => return Err(error),
            MockOutcome::Hang | MockOutcome::Delayed(..) => {
                return Err(ProviderError::Failed("mock outcome did not resolve".to_owned()));
            }
        };

        let body = stream::iter(chunks.into_iter().map(Ok));
        Ok(match end {
            StreamEnd::Complete => body.boxed(),
            StreamEnd::Fail(error) => body.chain(stream::once(future::ready(Err(error)))).boxed(),
            StreamEnd::Stall => body.chain(stream::pending()).boxed(),
        })
    }

    async fn check_health(&self) -> HealthStatus {
        HealthStatus {
            provider: self.kind,
            available: self.healthy && !self.catalog.is_empty(),
            latency_ms: 0,
            models: self
                .catalog
                .iter()
                .map(|descriptor| descriptor.name.clone())
                .collect(),
            error: (!self.healthy).then(|| format!("{} mock marked unhealthy", self.kind)),
        }
    }
}
