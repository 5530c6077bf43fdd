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
use crate::http::{HttpFailure, build_client, endpoint, transport_error};
use crate::sse::{self, SseEvent};
use crate::throttle::Throttle;

/// Public Anthropic API base URL.
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
/// Messages API path.
const MESSAGES_PATH: &str = "/v1/messages";
/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Status Anthropic returns when the API is overloaded.
const OVERLOADED_STATUS: u16 = 529;

/// Adapter for the Anthropic messages API.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    catalog: Vec<ModelDescriptor>,
    throttle: Arc<Throttle>,
}

impl AnthropicProvider {
    /// Creates an adapter with the given key.
    ///
    /// # Errors
    /// Returns an error if the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: String, options: AdapterOptions) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidCredentials(
                "Anthropic API key is empty".to_owned(),
            ));
        }

        Ok(Self {
            client: build_client(options.timeout)?,
            api_key,
            base_url: options
                .base_url
                .unwrap_or_else(|| ANTHROPIC_API_BASE.to_owned()),
            catalog: filter_catalog(Self::full_catalog(), options.models.as_deref()),
            throttle: Arc::new(Throttle::new(options.min_interval)),
        })
    }

    /// Every model this adapter knows how to price.
    pub fn full_catalog() -> Vec<ModelDescriptor> {
        vec![
            descriptor("claude-3-5-sonnet-20241022", "Claude 3.5 Sonnet", 8192, 0.003, 0.015),
            descriptor("claude-3-haiku-20240307", "Claude 3 Haiku", 4096, 0.000_25, 0.001_25),
            descriptor("claude-3-opus-20240229", "Claude 3 Opus", 4096, 0.015, 0.075),
        ]
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, MESSAGES_PATH))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|error| transport_error(&error))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_error(&HttpFailure::read(response).await))
        }
    }

    fn parse_stream_event(value: &Value) -> Result<SseEvent, ProviderError> {
        match value.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => Ok(value
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .map_or(SseEvent::Skip, |text| SseEvent::Text(text.to_owned()))),
            Some("message_stop") => Ok(SseEvent::Done),
            Some("error") => Err(classify_stream_error(value)),
            _ => Ok(SseEvent::Skip),
        }
    }
}

fn descriptor(
    name: &str,
    display_name: &str,
    max_output_tokens: u32,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
) -> ModelDescriptor {
    ModelDescriptor {
        provider: ProviderKind::Anthropic,
        name: name.to_owned(),
        display_name: display_name.to_owned(),
        max_output_tokens,
        context_window: 200_000,
        input_cost_per_1k,
        output_cost_per_1k,
        supports_streaming: true,
        supports_functions: true,
    }
}

fn error_type(body: Option<&Value>) -> Option<&str> {
    body?.pointer("/error/type")?.as_str()
}

/// Maps a failed Anthropic response to the provider error taxonomy.
pub fn classify_error(failure: &HttpFailure) -> ProviderError {
    let body = failure.json();
    let kind = error_type(body.as_ref());

    match (failure.status, kind) {
        (401 | 403, _) | (_, Some("authentication_error" | "permission_error")) => {
            ProviderError::InvalidCredentials(failure.message())
        }
        (404, _) | (_, Some("not_found_error")) => ProviderError::ModelUnavailable(failure.message()),
        (429 | OVERLOADED_STATUS, _) | (_, Some("rate_limit_error" | "overloaded_error")) => {
            ProviderError::RateLimited {
                retry_after: failure.retry_after,
            }
        }
        _ => ProviderError::Failed(failure.message()),
    }
}

/// Maps an `error` event received mid-stream.
fn classify_stream_error(value: &Value) -> ProviderError {
    let message = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown stream error");
    match error_type(Some(value)) {
        Some("overloaded_error" | "rate_limit_error") => ProviderError::RateLimited { retry_after: None },
        _ => ProviderError::Failed(format!("Anthropic stream error: {message}")),
    }
}

/// Response payload returned by the messages API.
#[derive(Deserialize)]
struct MessagesResponse {
    /// Message identifier.
    #[serde(default)]
    id: Option<String>,
    /// Content blocks; only text blocks carry output.
    content: Vec<ContentBlock>,
    /// Why generation stopped.
    #[serde(default)]
    stop_reason: Option<String>,
    /// Token accounting.
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model_catalog(&self) -> Vec<ModelDescriptor> {
        self.catalog.clone()
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.throttle.wait(&request.model).await;
        debug!("Anthropic request to {}", request.model);

        let response = self.send(&Self::request_body(request, false)).await?;
        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Failed(format!("Failed to parse response: {error}")))?;

        let content: String = api_response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        let mut metadata = HashMap::new();
        if let Some(id) = api_response.id {
            metadata.insert("id".to_owned(), Value::String(id));
        }
        if let Some(reason) = api_response.stop_reason {
            metadata.insert("stop_reason".to_owned(), Value::String(reason));
        }

        Ok(ProviderResponse {
            content,
            usage: TokenUsage::new(api_response.usage.input_tokens, api_response.usage.output_tokens),
            metadata,
        })
    }

    async fn generate_stream(&self, request: &ProviderRequest) -> Result<TextStream, ProviderError> {
        self.throttle.wait(&request.model).await;
        let response = self.send(&Self::request_body(request, true)).await?;
        Ok(sse::text_stream(response, Self::parse_stream_event))
    }

    async fn check_health(&self) -> HealthStatus {
        health::check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use futures::StreamExt as _;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failure(status: u16, body: &str) -> HttpFailure {
        HttpFailure {
            status,
            retry_after: None,
            body: body.to_owned(),
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "claude-3-haiku-20240307".to_owned(),
            prompt: "Оцени риски КП".to_owned(),
            system_prompt: Some("Ты аналитик".to_owned()),
            max_tokens: 512,
            temperature: 0.1,
        }
    }

    async fn provider_for(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new(
            "sk-ant-test".to_owned(),
            AdapterOptions::default()
                .with_base_url(server.uri())
                .with_models(["claude-3-haiku-20240307"])
                .without_throttle(),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify_error(&failure(403, "")),
            ProviderError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify_error(&failure(
                404,
                r#"{"type":"error","error":{"type":"not_found_error","message":"model: claude-9"}}"#
            )),
            ProviderError::ModelUnavailable(_)
        ));
        assert!(matches!(
            classify_error(&failure(
                529,
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            )),
            ProviderError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            classify_error(&failure(500, "")),
            ProviderError::Failed(_)
        ));
    }

    #[test]
    fn test_stream_error_event() {
        let event = json!({"type": "error", "error": {"type": "api_error", "message": "boom"}});
        let error = AnthropicProvider::parse_stream_event(&event).unwrap_err();
        assert_eq!(error.to_string(), "Provider error: Anthropic stream error: boom");
    }

    #[test]
    fn test_catalog_respects_configuration() {
        let provider = AnthropicProvider::new(
            "sk-ant-test".to_owned(),
            AdapterOptions::default().with_models(["claude-3-haiku-20240307"]),
        )
        .unwrap();
        let names: Vec<String> = provider
            .model_catalog()
            .into_iter()
            .map(|descriptor| descriptor.name)
            .collect();
        assert_eq!(names, vec!["claude-3-haiku-20240307"]);
        assert!(provider.serves("claude-3-haiku-20240307"));
        assert!(!provider.serves("claude-3-opus-20240229"));
    }

    #[tokio::test]
    async fn test_generate_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_01",
                "type": "message",
                "content": [
                    {"type": "text", "text": "Риск 1. "},
                    {"type": "text", "text": "Риск 2."}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 120, "output_tokens": 16}
            })))
            .mount(&server)
            .await;

        let response = provider_for(&server).await.generate(&request()).await.unwrap();
        assert_eq!(response.content, "Риск 1. Риск 2.");
        assert_eq!(response.usage.total(), 136);
        assert_eq!(response.metadata["stop_reason"], json!("end_turn"));
    }

    #[tokio::test]
    async fn test_overloaded_uses_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(529)
                    .insert_header("retry-after", "3")
                    .set_body_json(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
            )
            .mount(&server)
            .await;

        let error = provider_for(&server).await.generate(&request()).await.unwrap_err();
        assert_eq!(error.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_stream_reads_content_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Итог: \"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"соответствует\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server).await.generate_stream(&request()).await.unwrap();
        let pieces: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(pieces, vec!["Итог: ", "соответствует"]);
    }

    #[tokio::test]
    async fn test_stream_without_message_stop_fails() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"half\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server).await.generate_stream(&request()).await.unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "half");
        assert_eq!(items[1], Err(ProviderError::Failed(sse::TRUNCATED.to_owned())));
    }
}
