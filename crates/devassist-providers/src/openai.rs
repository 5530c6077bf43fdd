use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use devassist_core::{
    HealthStatus, LlmProvider, ModelDescriptor, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse, TextStream, TokenUsage,
};
use futures::{StreamExt as _, stream};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::factory::{AdapterOptions, filter_catalog};
use crate::health;
use crate::http::{HttpFailure, build_client, endpoint, transport_error};
use crate::sse::{self, SseEvent};
use crate::throttle::Throttle;

/// Public `OpenAI` API base URL.
const OPENAI_API_BASE: &str = "https://api.openai.com";
/// Chat completions path.
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Adapter for the `OpenAI` chat completions API.
#[derive(Clone)]
pub struct OpenAiProvider {
    /// HTTP client for API requests.
    client: Client,
    /// `OpenAI` API key.
    api_key: String,
    /// API base URL.
    base_url: String,
    /// Models this deployment serves.
    catalog: Vec<ModelDescriptor>,
    /// Courtesy spacing between calls.
    throttle: Arc<Throttle>,
}

impl OpenAiProvider {
    /// Creates an adapter with the given key.
    ///
    /// # Errors
    /// Returns an error if the key is empty or the HTTP client cannot be built.
    pub fn new(api_key: String, options: AdapterOptions) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidCredentials(
                "OpenAI API key is empty".to_owned(),
            ));
        }

        Ok(Self {
            client: build_client(options.timeout)?,
            api_key,
            base_url: options.base_url.unwrap_or_else(|| OPENAI_API_BASE.to_owned()),
            catalog: filter_catalog(Self::full_catalog(), options.models.as_deref()),
            throttle: Arc::new(Throttle::new(options.min_interval)),
        })
    }

    /// Every model this adapter knows how to price.
    pub fn full_catalog() -> Vec<ModelDescriptor> {
        vec![
            descriptor("gpt-4o", "GPT-4o", 16_384, 0.0025, 0.01, true),
            descriptor("gpt-4o-mini", "GPT-4o mini", 16_384, 0.000_15, 0.0006, true),
            descriptor("gpt-4-turbo", "GPT-4 Turbo", 4096, 0.01, 0.03, true),
            descriptor("o1-preview", "o1 preview", 32_768, 0.015, 0.06, false),
        ]
    }

    /// Reasoning models take no system role and no temperature.
    fn is_reasoning_model(model: &str) -> bool {
        model.starts_with("o1")
    }

    /// Builds the chat completions request body.
    fn request_body(request: &ProviderRequest, stream: bool) -> Value {
        let reasoning = Self::is_reasoning_model(&request.model);
        let mut messages = Vec::with_capacity(2);
        let mut prompt = request.prompt.clone();
        if let Some(system) = &request.system_prompt {
            if reasoning {
                prompt = format!("{system}\n\n{prompt}");
            } else {
                messages.push(json!({ "role": "system", "content": system }));
            }
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if reasoning {
            body["max_completion_tokens"] = json!(request.max_tokens);
        } else {
            body["max_tokens"] = json!(request.max_tokens);
            body["temperature"] = json!(request.temperature);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    /// Sends a request and classifies a non-success status.
    async fn send(&self, body: &Value) -> Result<Response, ProviderError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, CHAT_COMPLETIONS_PATH))
            .bearer_auth(&self.api_key)
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

    /// Extracts text from one streamed chunk.
    fn parse_stream_event(value: &Value) -> Result<SseEvent, ProviderError> {
        if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
            return Err(ProviderError::Failed(format!("OpenAI stream error: {message}")));
        }
        Ok(value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map_or(SseEvent::Skip, |text| SseEvent::Text(text.to_owned())))
    }
}

fn descriptor(
    name: &str,
    display_name: &str,
    max_output_tokens: u32,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
    supports_streaming: bool,
) -> ModelDescriptor {
    ModelDescriptor {
        provider: ProviderKind::OpenAi,
        name: name.to_owned(),
        display_name: display_name.to_owned(),
        max_output_tokens,
        context_window: 128_000,
        input_cost_per_1k,
        output_cost_per_1k,
        supports_streaming,
        supports_functions: supports_streaming,
    }
}

/// Maps a failed `OpenAI` response to the provider error taxonomy.
pub fn classify_error(failure: &HttpFailure) -> ProviderError {
    let body = failure.json();
    let field = |pointer: &str| {
        body.as_ref()
            .and_then(|value| value.pointer(pointer))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    };
    let code = field("/error/code");
    let error_type = field("/error/type");
    let quota_exhausted = code.as_deref() == Some("insufficient_quota")
        || error_type.as_deref() == Some("insufficient_quota");

    match failure.status {
        401 => ProviderError::InvalidCredentials(failure.message()),
        404 => ProviderError::ModelUnavailable(failure.message()),
        _ if code.as_deref() == Some("model_not_found") => {
            ProviderError::ModelUnavailable(failure.message())
        }
        429 if quota_exhausted => ProviderError::Failed(failure.message()),
        429 => ProviderError::RateLimited {
            retry_after: failure.retry_after,
        },
        _ => ProviderError::Failed(failure.message()),
    }
}

/// Response payload returned by the chat completions API.
#[derive(Deserialize)]
struct ChatResponse {
    /// Response identifier.
    #[serde(default)]
    id: Option<String>,
    /// Generated choices.
    choices: Vec<Choice>,
    /// Token accounting.
    #[serde(default)]
    usage: Option<Usage>,
}

/// Individual completion choice.
#[derive(Deserialize)]
struct Choice {
    /// Assistant message.
    message: Message,
    /// Why generation stopped.
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Assistant message content.
#[derive(Deserialize)]
struct Message {
    /// Text content; absent for refusals and tool calls.
    #[serde(default)]
    content: Option<String>,
}

/// Token accounting information for a response.
#[derive(Deserialize)]
struct Usage {
    /// Prompt tokens billed.
    prompt_tokens: u64,
    /// Completion tokens billed.
    completion_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model_catalog(&self) -> Vec<ModelDescriptor> {
        self.catalog.clone()
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.throttle.wait(&request.model).await;
        debug!("OpenAI request to {}", request.model);

        let response = self.send(&Self::request_body(request, false)).await?;
        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Failed(format!("Failed to parse response: {error}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Failed("No choices in OpenAI response".to_owned()))?;

        let usage = api_response.usage.map_or_else(TokenUsage::default, |usage| {
            TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)
        });

        let mut metadata = HashMap::new();
        if let Some(id) = api_response.id {
            metadata.insert("id".to_owned(), Value::String(id));
        }
        if let Some(reason) = choice.finish_reason {
            metadata.insert("finish_reason".to_owned(), Value::String(reason));
        }

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            metadata,
        })
    }

    async fn generate_stream(&self, request: &ProviderRequest) -> Result<TextStream, ProviderError> {
        let streams = self
            .descriptor(&request.model)
            .is_some_and(|descriptor| descriptor.supports_streaming);
        if !streams {
            let response = self.generate(request).await?;
            return Ok(stream::once(async move { Ok(response.content) }).boxed());
        }

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
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failure(status: u16, body: &str) -> HttpFailure {
        HttpFailure {
            status,
            retry_after: None,
            body: body.to_owned(),
        }
    }

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest {
            model: model.to_owned(),
            prompt: "Извлеки сроки поставки".to_owned(),
            system_prompt: Some("Ты эксперт по тендерам".to_owned()),
            max_tokens: 256,
            temperature: 0.2,
        }
    }

    async fn provider_for(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            "test-key".to_owned(),
            AdapterOptions::default()
                .with_base_url(server.uri())
                .without_throttle(),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_credentials_and_models() {
        assert!(matches!(
            classify_error(&failure(401, r#"{"error":{"message":"Incorrect API key"}}"#)),
            ProviderError::InvalidCredentials(_)
        ));
        assert!(matches!(
            classify_error(&failure(404, "")),
            ProviderError::ModelUnavailable(_)
        ));
        assert!(matches!(
            classify_error(&failure(
                400,
                r#"{"error":{"message":"The model does not exist","code":"model_not_found"}}"#
            )),
            ProviderError::ModelUnavailable(_)
        ));
    }

    #[test]
    fn test_classify_rate_limit_and_quota() {
        let mut limited = failure(429, r#"{"error":{"type":"requests","message":"slow down"}}"#);
        limited.retry_after = Some(Duration::from_secs(7));
        assert_eq!(
            classify_error(&limited),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );

        let quota = failure(
            429,
            r#"{"error":{"type":"insufficient_quota","code":"insufficient_quota","message":"quota"}}"#,
        );
        assert!(matches!(classify_error(&quota), ProviderError::Failed(_)));
    }

    #[test]
    fn test_classify_server_error_is_generic() {
        assert!(matches!(
            classify_error(&failure(500, "upstream exploded")),
            ProviderError::Failed(_)
        ));
    }

    #[test]
    fn test_reasoning_model_body() {
        let body = OpenAiProvider::request_body(&request("o1-preview"), false);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_completion_tokens"], json!(256));
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["content"].as_str().unwrap().starts_with("Ты эксперт"));
    }

    #[test]
    fn test_chat_model_body() {
        let body = OpenAiProvider::request_body(&request("gpt-4o"), true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["max_tokens"], json!(256));
        assert_eq!(body["stream"], json!(true));
    }

    #[tokio::test]
    async fn test_generate_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{"message": {"role": "assistant", "content": "Срок: 30 дней"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49}
            })))
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .await
            .generate(&request("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(response.content, "Срок: 30 дней");
        assert_eq!(response.usage, TokenUsage::new(42, 7));
        assert_eq!(response.metadata["finish_reason"], json!("stop"));
    }

    #[tokio::test]
    async fn test_generate_maps_rate_limit_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "5")
                    .set_body_json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
            )
            .mount(&server)
            .await;

        let error = provider_for(&server)
            .await
            .generate(&request("gpt-4o"))
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(5))
            }
        );
    }

    #[tokio::test]
    async fn test_stream_yields_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Риск: \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"низкий\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .await
            .generate_stream(&request("gpt-4o-mini"))
            .await
            .unwrap();
        let pieces: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(pieces.concat(), "Риск: низкий");
    }

    #[tokio::test]
    async fn test_non_streaming_model_yields_single_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "полный ответ"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .await
            .generate_stream(&request("o1-preview"))
            .await
            .unwrap();
        let pieces: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(pieces, vec!["полный ответ"]);
    }

    #[tokio::test]
    async fn test_health_reports_invalid_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "Incorrect API key provided"}})),
            )
            .mount(&server)
            .await;

        let status = provider_for(&server).await.check_health().await;
        assert!(!status.available);
        assert!(status.error.unwrap().contains("Incorrect API key"));
        assert_eq!(status.models.len(), 4);
    }

    #[tokio::test]
    async fn test_stream_without_done_fails() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Риск: \"}}]}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server)
            .await
            .generate_stream(&request("gpt-4o-mini"))
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Риск: ");
        assert_eq!(items[1], Err(ProviderError::Failed(sse::TRUNCATED.to_owned())));
    }
}
