//! Request orchestration: cache, selection, limits, retry and fallback.

use core::future::Future;
use core::mem;
use core::result::Result as CoreResult;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use devassist_core::sync::IgnoreLock as _;
use devassist_core::{
    DevAssistConfig, GenerationRequest, GenerationResult, HealthStatus, KeyValueStore,
    LlmProvider, ModelDescriptor, ProviderError, ProviderRequest, ProviderResponse, StreamChunk,
    StreamSummary, TextStream, TokenUsage, estimate_tokens,
};
use futures::StreamExt as _;
use futures::future::join_all;
use futures::stream::{self, BoxStream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::error::Result;
use crate::prompts::{DEFAULT_TEMPLATE, PromptManager};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::selection::{ModelSelector, Selection};
use crate::usage::{UsageQuery, UsageRecord, UsageSummary, UsageTracker};

/// Stream of orchestrated chunks; ends with exactly one `Done` or `Error`.
pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Error text for requests refused by the spend-limit check.
pub const LIMIT_EXCEEDED: &str = "spend limit exceeded";

/// Prompt pair sent to the adapters.
#[derive(Debug, Clone)]
struct ResolvedPrompt {
    system: Option<String>,
    user: String,
}

impl ResolvedPrompt {
    fn input_tokens(&self) -> u64 {
        estimate_tokens(&self.user) + self.system.as_deref().map_or(0, estimate_tokens)
    }
}

/// Outcome of walking the retry and fallback chain.
struct Attempted<T> {
    /// Adapter of the last call made
    provider: Arc<dyn LlmProvider>,
    /// Model of the last call made
    descriptor: ModelDescriptor,
    /// Adapter calls made in total
    attempts: u32,
    outcome: CoreResult<T, ProviderError>,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Entry point for generation requests.
///
/// Cheap to clone; clones share adapters, store and pending usage writes.
#[derive(Clone)]
pub struct Orchestrator {
    registry: ProviderRegistry,
    selector: ModelSelector,
    cache: ResponseCache,
    tracker: UsageTracker,
    prompts: Option<Arc<PromptManager>>,
    retry: RetryPolicy,
    request_timeout: Duration,
    pending_usage: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Orchestrator {
    /// Creates an orchestrator over an explicit registry and store.
    ///
    /// No prompt manager is attached; request content is sent as the prompt.
    pub fn new(
        config: &DevAssistConfig,
        registry: ProviderRegistry,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            registry,
            selector: ModelSelector::new(config.selection.clone()),
            cache: ResponseCache::new(Arc::clone(&store), &config.cache),
            tracker: UsageTracker::new(store, config.limits.clone()),
            prompts: None,
            retry: RetryPolicy::from_config(&config.failover),
            request_timeout: config.providers.request_timeout(),
            pending_usage: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Builds adapters and prompt templates from configuration.
    ///
    /// # Errors
    /// Returns an error if an adapter cannot be built or a template source is invalid.
    pub fn from_config(config: &DevAssistConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        info!(
            "Registered {} provider(s), priority {:?}",
            registry.len(),
            registry.priority()
        );
        let mut orchestrator = Self::new(config, registry, store);

        if config.prompts.builtin || config.prompts.template_file.is_some() {
            let prompts = PromptManager::from_config(&config.prompts)?;
            orchestrator = orchestrator.with_prompts(Arc::new(prompts));
        }
        Ok(orchestrator)
    }

    /// Attaches a prompt manager whose `default` templates shape prompts.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Arc<PromptManager>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the per-call timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Registered adapters.
    pub const fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Usage tracker shared with background writes.
    pub const fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    /// Attached prompt manager, if any.
    pub fn prompts(&self) -> Option<&Arc<PromptManager>> {
        self.prompts.as_ref()
    }

    /// Generates text for a request.
    ///
    /// Provider failures are reported through [`GenerationResult::error`];
    /// only configuration and template problems come back as `Err`.
    ///
    /// # Errors
    /// Returns an error if no provider can serve the request or the prompt
    /// template cannot be rendered.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let started = Instant::now();

        if let Some(mut hit) = self.cache.get(request).await {
            info!(
                "Serving {} from cache ({}/{})",
                request.correlation_id, hit.provider_used, hit.model_used
            );
            hit.correlation_id.clone_from(&request.correlation_id);
            hit.cached = true;
            hit.attempts = 0;
            hit.latency_ms = elapsed_ms(started);
            return Ok(hit);
        }

        let selection = self.selector.select(&self.registry, request)?;
        debug!(
            "Selected {}/{} for {} ({})",
            selection.provider.kind(),
            selection.descriptor.name,
            request.correlation_id,
            selection.reason
        );
        let prompt = self.resolve_prompt(request)?;

        if !self.within_limits(request, &selection.descriptor, &prompt).await {
            return Ok(Self::failure(
                request,
                &selection.descriptor,
                LIMIT_EXCEEDED.to_owned(),
                0,
                started,
            ));
        }

        let attempted = self
            .run_chain(&selection, request, &prompt, |provider, provider_request| async move {
                provider.generate(&provider_request).await
            })
            .await;

        let result = match attempted.outcome {
            Ok(response) => {
                Self::success(request, &attempted.descriptor, response, attempted.attempts, started)
            }
            Err(provider_error) => {
                error!(
                    "All providers failed for {} after {} attempt(s): {provider_error}",
                    request.correlation_id, attempted.attempts
                );
                Self::failure(
                    request,
                    &attempted.descriptor,
                    provider_error.to_string(),
                    attempted.attempts,
                    started,
                )
            }
        };

        self.spawn_record(Self::usage_record(request, &result));
        self.cache.put(request, &result).await;
        Ok(result)
    }

    /// Streams text for a request.
    ///
    /// Opening the stream follows the retry and fallback policy. Once text
    /// flows a failure ends the stream with a final `Error` chunk.
    ///
    /// # Errors
    /// Returns an error if no provider can serve the request or the prompt
    /// template cannot be rendered.
    pub async fn generate_stream(&self, request: &GenerationRequest) -> Result<ChunkStream> {
        let started = Instant::now();
        let selection = self.selector.select(&self.registry, request)?;
        let prompt = self.resolve_prompt(request)?;

        if !self.within_limits(request, &selection.descriptor, &prompt).await {
            let refused = StreamChunk::Error(LIMIT_EXCEEDED.to_owned());
            return Ok(stream::once(async move { refused }).boxed());
        }

        let attempted = self
            .run_chain(&selection, request, &prompt, |provider, provider_request| async move {
                provider.generate_stream(&provider_request).await
            })
            .await;

        let text_stream = match attempted.outcome {
            Ok(text_stream) => text_stream,
            Err(provider_error) => {
                error!(
                    "Could not open a stream for {} after {} attempt(s): {provider_error}",
                    request.correlation_id, attempted.attempts
                );
                let result = Self::failure(
                    request,
                    &attempted.descriptor,
                    provider_error.to_string(),
                    attempted.attempts,
                    started,
                );
                self.spawn_record(Self::usage_record(request, &result));
                let failed = StreamChunk::Error(provider_error.to_string());
                return Ok(stream::once(async move { failed }).boxed());
            }
        };

        info!(
            "Streaming {} from {}/{}",
            request.correlation_id,
            attempted.provider.kind(),
            attempted.descriptor.name
        );
        Ok(self.relay(
            request.clone(),
            attempted.descriptor,
            prompt.input_tokens(),
            text_stream,
            started,
        ))
    }

    /// Checks every registered adapter concurrently.
    pub async fn get_health(&self) -> Vec<HealthStatus> {
        let providers = self.registry.ordered();
        join_all(providers.iter().map(|provider| provider.check_health())).await
    }

    /// Usage rollup for a query.
    ///
    /// # Errors
    /// Returns an error if the store fails or holds unreadable records.
    pub async fn get_usage(&self, query: &UsageQuery) -> Result<UsageSummary> {
        self.tracker.get_usage(query).await
    }

    /// Whether the requesters may spend `projected_cost` more.
    pub async fn check_limit(
        &self,
        user_id: Option<&str>,
        organization_id: Option<&str>,
        projected_cost: f64,
    ) -> bool {
        self.tracker
            .check_limit(user_id, organization_id, projected_cost)
            .await
    }

    /// Waits for every background usage write started so far.
    pub async fn flush_usage(&self) {
        let pending = mem::take(&mut *self.pending_usage.lock_ignore_poison());
        for handle in pending {
            if let Err(join_error) = handle.await {
                warn!("Usage write task failed: {join_error}");
            }
        }
    }

    fn resolve_prompt(&self, request: &GenerationRequest) -> Result<ResolvedPrompt> {
        if let Some(user) = &request.user_prompt {
            return Ok(ResolvedPrompt {
                system: request.system_prompt.clone(),
                user: user.clone(),
            });
        }
        if let Some(prompts) = &self.prompts {
            if prompts.contains(request.task_type, DEFAULT_TEMPLATE) {
                let variables = HashMap::from([("content".to_owned(), request.content.clone())]);
                let (system, user) = prompts.render(request.task_type, DEFAULT_TEMPLATE, &variables)?;
                let system = request
                    .system_prompt
                    .clone()
                    .or_else(|| (!system.trim().is_empty()).then_some(system));
                return Ok(ResolvedPrompt { system, user });
            }
        }
        Ok(ResolvedPrompt {
            system: request.system_prompt.clone(),
            user: request.content.clone(),
        })
    }

    async fn within_limits(
        &self,
        request: &GenerationRequest,
        descriptor: &ModelDescriptor,
        prompt: &ResolvedPrompt,
    ) -> bool {
        if !self.tracker.limits().enforce
            || (request.user_id.is_none() && request.organization_id.is_none())
        {
            return true;
        }
        let projected = descriptor.cost_for(&TokenUsage::new(prompt.input_tokens(), 0));
        let allowed = self
            .tracker
            .check_limit(
                request.user_id.as_deref(),
                request.organization_id.as_deref(),
                projected,
            )
            .await;
        if !allowed {
            warn!(
                "Refusing {}: projected ${projected:.6} exceeds spend limit",
                request.correlation_id
            );
        }
        allowed
    }

    fn provider_request(
        request: &GenerationRequest,
        descriptor: &ModelDescriptor,
        prompt: &ResolvedPrompt,
    ) -> ProviderRequest {
        ProviderRequest {
            model: descriptor.name.clone(),
            prompt: prompt.user.clone(),
            system_prompt: prompt.system.clone(),
            max_tokens: descriptor.clamp_max_tokens(request.max_tokens),
            temperature: request.temperature,
        }
    }

    async fn call_once<T, F, Fut>(
        &self,
        provider: &Arc<dyn LlmProvider>,
        provider_request: ProviderRequest,
        call: &F,
    ) -> CoreResult<T, ProviderError>
    where
        T: Send,
        F: Fn(Arc<dyn LlmProvider>, ProviderRequest) -> Fut + Sync,
        Fut: Future<Output = CoreResult<T, ProviderError>> + Send,
    {
        match timeout(self.request_timeout, call(Arc::clone(provider), provider_request)).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(ProviderError::Failed(format!(
                "{} request timed out after {}s",
                provider.kind(),
                self.request_timeout.as_secs_f64()
            ))),
        }
    }

    /// Calls the selected pair with retries, then each fallback provider once.
    async fn run_chain<T, F, Fut>(
        &self,
        selection: &Selection,
        request: &GenerationRequest,
        prompt: &ResolvedPrompt,
        call: F,
    ) -> Attempted<T>
    where
        T: Send,
        F: Fn(Arc<dyn LlmProvider>, ProviderRequest) -> Fut + Sync,
        Fut: Future<Output = CoreResult<T, ProviderError>> + Send,
    {
        let primary = &selection.provider;
        let mut attempts = 0_u32;
        let mut retry = 0_u32;

        let primary_error = loop {
            attempts += 1;
            let provider_request = Self::provider_request(request, &selection.descriptor, prompt);
            match self.call_once(primary, provider_request, &call).await {
                Ok(value) => {
                    return Attempted {
                        provider: Arc::clone(primary),
                        descriptor: selection.descriptor.clone(),
                        attempts,
                        outcome: Ok(value),
                    };
                }
                Err(provider_error)
                    if provider_error.is_retryable() && retry + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for(retry, provider_error.retry_after());
                    warn!(
                        "{}/{} rate limited for {} (attempt {attempts}); retrying in {delay:?}",
                        primary.kind(),
                        selection.descriptor.name,
                        request.correlation_id
                    );
                    sleep(delay).await;
                    retry += 1;
                }
                Err(provider_error) => break provider_error,
            }
        };

        let mut last = Attempted {
            provider: Arc::clone(primary),
            descriptor: selection.descriptor.clone(),
            attempts,
            outcome: Err(primary_error),
        };
        if !self.retry.fallback {
            return last;
        }

        for provider in self.registry.ordered() {
            if provider.kind() == primary.kind() {
                continue;
            }
            let Some(descriptor) = provider.model_catalog().into_iter().next() else {
                continue;
            };
            if let Err(previous) = &last.outcome {
                warn!(
                    "Falling back to {}/{} for {} after: {previous}",
                    provider.kind(),
                    descriptor.name,
                    request.correlation_id
                );
            }
            last.attempts += 1;
            let provider_request = Self::provider_request(request, &descriptor, prompt);
            let outcome = self.call_once(&provider, provider_request, &call).await;
            let succeeded = outcome.is_ok();
            last.provider = provider;
            last.descriptor = descriptor;
            last.outcome = outcome;
            if succeeded {
                break;
            }
        }
        last
    }

    fn success(
        request: &GenerationRequest,
        descriptor: &ModelDescriptor,
        response: ProviderResponse,
        attempts: u32,
        started: Instant,
    ) -> GenerationResult {
        let cost_usd = descriptor.cost_for(&response.usage);
        let latency_ms = elapsed_ms(started);
        info!(
            "Completed {} via {}/{} in {latency_ms}ms ({} tokens, ${cost_usd:.6}, {attempts} attempt(s))",
            request.correlation_id,
            descriptor.provider,
            descriptor.name,
            response.usage.total()
        );
        GenerationResult {
            correlation_id: request.correlation_id.clone(),
            content: response.content,
            provider_used: descriptor.provider,
            model_used: descriptor.name.clone(),
            usage: response.usage,
            cost_usd,
            latency_ms,
            created_at: Utc::now(),
            error: None,
            attempts,
            cached: false,
        }
    }

    fn failure(
        request: &GenerationRequest,
        descriptor: &ModelDescriptor,
        message: String,
        attempts: u32,
        started: Instant,
    ) -> GenerationResult {
        GenerationResult {
            correlation_id: request.correlation_id.clone(),
            content: String::new(),
            provider_used: descriptor.provider,
            model_used: descriptor.name.clone(),
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            latency_ms: elapsed_ms(started),
            created_at: Utc::now(),
            error: Some(message),
            attempts,
            cached: false,
        }
    }

    fn usage_record(request: &GenerationRequest, result: &GenerationResult) -> UsageRecord {
        UsageRecord {
            timestamp: result.created_at,
            correlation_id: request.correlation_id.clone(),
            user_id: request.user_id.clone(),
            organization_id: request.organization_id.clone(),
            provider: result.provider_used,
            model: result.model_used.clone(),
            task_type: request.task_type,
            usage: result.usage,
            cost_usd: result.cost_usd,
            latency_ms: result.latency_ms,
            success: result.is_success(),
            error: result.error.clone(),
        }
    }

    fn spawn_record(&self, record: UsageRecord) {
        let tracker = self.tracker.clone();
        let handle = tokio::spawn(async move { tracker.record(&record).await });
        let mut pending = self.pending_usage.lock_ignore_poison();
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }

    /// Forwards adapter text as chunks and settles accounting at the end.
    fn relay(
        &self,
        request: GenerationRequest,
        descriptor: ModelDescriptor,
        input_tokens: u64,
        mut text_stream: TextStream,
        started: Instant,
    ) -> ChunkStream {
        let orchestrator = self.clone();
        let chunk_timeout = self.request_timeout;
        async_stream::stream! {
            let mut text = String::new();
            let mut failure = None;
            loop {
                match timeout(chunk_timeout, text_stream.next()).await {
                    Ok(Some(Ok(piece))) => {
                        text.push_str(&piece);
                        yield StreamChunk::Delta(piece);
                    }
                    Ok(Some(Err(provider_error))) => {
                        failure = Some(provider_error.to_string());
                        break;
                    }
                    Ok(None) => break,
                    Err(_elapsed) => {
                        failure = Some(format!(
                            "{} stream stalled for {}s",
                            descriptor.provider,
                            chunk_timeout.as_secs_f64()
                        ));
                        break;
                    }
                }
            }

            let usage = TokenUsage::new(input_tokens, estimate_tokens(&text));
            let result = GenerationResult {
                correlation_id: request.correlation_id.clone(),
                content: text,
                provider_used: descriptor.provider,
                model_used: descriptor.name.clone(),
                usage,
                cost_usd: descriptor.cost_for(&usage),
                latency_ms: elapsed_ms(started),
                created_at: Utc::now(),
                error: failure,
                attempts: 0,
                cached: false,
            };
            orchestrator.spawn_record(Self::usage_record(&request, &result));

            match result.error {
                Some(message) => {
                    warn!("Stream {} ended with an error: {message}", request.correlation_id);
                    yield StreamChunk::Error(message);
                }
                None => {
                    info!(
                        "Stream {} finished: {} tokens, ${:.6}",
                        request.correlation_id,
                        result.usage.total(),
                        result.cost_usd
                    );
                    yield StreamChunk::Done(StreamSummary {
                        correlation_id: result.correlation_id,
                        provider_used: result.provider_used,
                        model_used: result.model_used,
                        usage: result.usage,
                        cost_usd: result.cost_usd,
                        latency_ms: result.latency_ms,
                    });
                }
            }
        }
        .boxed()
    }
}
