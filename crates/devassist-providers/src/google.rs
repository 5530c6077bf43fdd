use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use devassist_core::{
    HealthStatus, LlmProvider, ModelDescriptor, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse, TextStream, TokenUsage,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::factory::{AdapterOptions, filter_catalog};
use crate::health;
use crate::http::{HttpFailure, build_client, endpoint, seconds_to_duration, transport_error};
use crate::sse::{self, SseEvent};
use crate::throttle::Throttle;

/// Public Gemini API base URL.
const GOOGLE_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Adapter for the Google Gemini `generateContent` API.
#[derive(Clone)]
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    catalog: Vec<ModelDescriptor>,
    throttle: Arc<Throttle>,
}

impl GoogleProvider {
    /// Creates an adapter with the given key.
    ///
    /// # Errors
    /// Returns an error if the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: String, options: AdapterOptions) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidCredentials(
                "Google API key is empty".to_owned(),
            ));
        }

        Ok(Self {
            client: build_client(options.timeout)?,
            api_key,
            base_url: options.base_url.unwrap_or_else(|| GOOGLE_API_BASE.to_owned()),
            catalog: filter_catalog(Self::full_catalog(), options.models.as_deref()),
            throttle: Arc::new(Throttle::new(options.min_interval)),
        })
    }

    /// Every model this adapter knows how to price.
    pub fn full_catalog() -> Vec<ModelDescriptor> {
        vec![
            descriptor("gemini-1.5-pro", "Gemini 1.5 Pro", 2_000_000, 0.001_25, 0.005),
            descriptor("gemini-1.5-flash", "Gemini 1.5 Flash", 1_000_000, 0.000_075, 0.0003),
        ]
    }

    fn model_endpoint(&self, model: &str, stream: bool) -> String {
        if stream {
            endpoint(
                &self.base_url,
                &format!("/v1beta/models/{model}:streamGenerateContent?alt=sse"),
            )
        } else {
            endpoint(&self.base_url, &format!("/v1beta/models/{model}:generateContent"))
        }
    }

    fn request_body(request: &ProviderRequest) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    async fn send(&self, request: &ProviderRequest, stream: bool) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(self.model_endpoint(&request.model, stream))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|error| transport_error(&error))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_error(&HttpFailure::read(response).await))
        }
    }

    /// Concatenates the text parts of the first candidate.
    fn candidate_text(value: &Value) -> Option<String> {
        let parts = value.pointer("/candidates/0/content/parts")?.as_array()?;
        Some(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
        )
    }

    fn parse_stream_event(value: &Value) -> Result<SseEvent, ProviderError> {
        if value.get("error").is_some() {
            return Err(classify_body(0, None, value));
        }
        let text = Self::candidate_text(value);
        if value.pointer("/candidates/0/finishReason").is_some() {
            return Ok(SseEvent::Final(text.unwrap_or_default()));
        }
        Ok(text.map_or(SseEvent::Skip, SseEvent::Text))
    }
}

fn descriptor(
    name: &str,
    display_name: &str,
    context_window: u32,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
) -> ModelDescriptor {
    ModelDescriptor {
        provider: ProviderKind::Google,
        name: name.to_owned(),
        display_name: display_name.to_owned(),
        max_output_tokens: 8192,
        context_window,
        input_cost_per_1k,
        output_cost_per_1k,
        supports_streaming: true,
        supports_functions: true,
    }
}

/// Reads `retryDelay` (e.g. `"30s"`) from a `google.rpc.RetryInfo` detail.
fn retry_delay(body: &Value) -> Option<Duration> {
    body.pointer("/error/details")?
        .as_array()?
        .iter()
        .filter_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .find_map(|delay| seconds_to_duration(delay.trim_end_matches('s').parse().ok()?))
}

fn has_reason(body: &Value, reason: &str) -> bool {
    body.pointer("/error/details")
        .and_then(Value::as_array)
        .is_some_and(|details| {
            details
                .iter()
                .any(|detail| detail.get("reason").and_then(Value::as_str) == Some(reason))
        })
}

fn classify_body(status: u16, header_delay: Option<Duration>, body: &Value) -> ProviderError {
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_owned();
    let rpc_status = body.pointer("/error/status").and_then(Value::as_str);
    let summary = if status == 0 {
        message
    } else {
        format!("HTTP {status}: {message}")
    };

    if matches!(status, 401 | 403)
        || has_reason(body, "API_KEY_INVALID")
        || rpc_status == Some("UNAUTHENTICATED")
    {
        ProviderError::InvalidCredentials(summary)
    } else if status == 404 || rpc_status == Some("NOT_FOUND") {
        ProviderError::ModelUnavailable(summary)
    } else if status == 429 || rpc_status == Some("RESOURCE_EXHAUSTED") {
        ProviderError::RateLimited {
            retry_after: header_delay.or_else(|| retry_delay(body)),
        }
    } else {
        ProviderError::Failed(summary)
    }
}

/// Maps a failed Gemini response to the provider error taxonomy.
pub fn classify_error(failure: &HttpFailure) -> ProviderError {
    failure.json().map_or_else(
        || match failure.status {
            401 | 403 => ProviderError::InvalidCredentials(failure.message()),
            404 => ProviderError::ModelUnavailable(failure.message()),
            429 => ProviderError::RateLimited {
                retry_after: failure.retry_after,
            },
            _ => ProviderError::Failed(failure.message()),
        },
        |body| classify_body(failure.status, failure.retry_after, &body),
    )
}

/// Usage block of a `generateContent` response.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn model_catalog(&self) -> Vec<ModelDescriptor> {
        self.catalog.clone()
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.throttle.wait(&request.model).await;
        debug!("Gemini request to {}", request.model);

        let response = self.send(request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|error| ProviderError::Failed(format!("Failed to parse response: {error}")))?;

        let Some(content) = Self::candidate_text(&body) else {
            let reason = body
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates returned");
            return Err(ProviderError::Failed(format!("Gemini returned no text: {reason}")));
        };

        let usage = body
            .get("usageMetadata")
            .cloned()
            .and_then(|value| serde_json::from_value::<UsageMetadata>(value).ok())
            .map_or_else(TokenUsage::default, |usage| {
                TokenUsage::new(usage.prompt_token_count, usage.candidates_token_count)
            });

        let mut metadata = HashMap::new();
        if let Some(reason) = body.pointer("/candidates/0/finishReason") {
            metadata.insert("finish_reason".to_owned(), reason.clone());
        }

        Ok(ProviderResponse {
            content,
            usage,
            metadata,
        })
    }

    async fn generate_stream(&self, request: &ProviderRequest) -> Result<TextStream, ProviderError> {
        self.throttle.wait(&request.model).await;
        let response = self.send(request, true).await?;
        Ok(sse::text_stream(response, Self::parse_stream_event))
    }

    async fn check_health(&self) -> HealthStatus {
        health::check(self).await
    }
}
