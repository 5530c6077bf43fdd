use core::fmt::{Display, Formatter, Result as FmtResult};
use core::str::FromStr;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default sampling temperature for analysis work.
const DEFAULT_TEMPERATURE: f32 = 0.3;
/// Default cap on generated tokens.
const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Category of LLM work, used to pick a default model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Free-form analysis of a document.
    TextAnalysis,
    /// Pulling structured fields out of a document.
    DataExtraction,
    /// Reformatting a document into another shape.
    DocumentConversion,
    /// Writing a narrative report from scored data.
    ReportGeneration,
    /// Identifying risks in a proposal.
    RiskAssessment,
    /// Producing recommendations for the reviewer.
    Recommendation,
    /// Comparing a proposal against a specification.
    Comparison,
    /// Answering a lookup query over documents.
    Search,
}

impl TaskType {
    /// Stable snake-case identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TextAnalysis => "text_analysis",
            Self::DataExtraction => "data_extraction",
            Self::DocumentConversion => "document_conversion",
            Self::ReportGeneration => "report_generation",
            Self::RiskAssessment => "risk_assessment",
            Self::Recommendation => "recommendation",
            Self::Comparison => "comparison",
            Self::Search => "search",
        }
    }

    /// Every task type.
    #[must_use]
    pub const fn all() -> [Self; 8] {
        [
            Self::TextAnalysis,
            Self::DataExtraction,
            Self::DocumentConversion,
            Self::ReportGeneration,
            Self::RiskAssessment,
            Self::Recommendation,
            Self::Comparison,
            Self::Search,
        ]
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::all()
            .into_iter()
            .find(|task| task.as_str() == normalized)
            .ok_or_else(|| format!("unknown task type: {value}"))
    }
}

/// Column of the task-type selection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Balanced choice.
    #[default]
    Default,
    /// Cheapest acceptable model.
    Fast,
    /// Most capable model.
    Quality,
}

impl Display for ModelTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Default => write!(f, "default"),
            Self::Fast => write!(f, "fast"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "fast" => Ok(Self::Fast),
            "quality" => Ok(Self::Quality),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `OpenAI` chat completions.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google Gemini.
    Google,
}

impl ProviderKind {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Environment variable consulted for this vendor's API key.
    #[must_use]
    pub const fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
        }
    }

    /// Every vendor, in default priority order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::OpenAi, Self::Anthropic, Self::Google]
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
}

impl TokenUsage {
    /// Creates a usage record from input and output counts.
    #[must_use]
    pub const fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Input plus output.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Rough token estimate used where the vendor reports nothing.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Static pricing and capability record for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Vendor serving the model.
    pub provider: ProviderKind,
    /// Identifier sent to the vendor API.
    pub name: String,
    /// Human-readable name.
    pub display_name: String,
    /// Largest completion the model will produce.
    pub max_output_tokens: u32,
    /// Context window in tokens.
    pub context_window: u32,
    /// USD per 1K input tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1K output tokens.
    pub output_cost_per_1k: f64,
    /// Whether the vendor streams this model.
    pub supports_streaming: bool,
    /// Whether the model accepts function definitions.
    pub supports_functions: bool,
}

impl ModelDescriptor {
    /// Cost in USD for the given usage, rounded to micro-dollars.
    ///
    /// Never negative; depends only on token counts and published rates.
    #[must_use]
    pub fn cost_for(&self, usage: &TokenUsage) -> f64 {
        let raw = (usage.input as f64 / 1000.0)
            .mul_add(self.input_cost_per_1k, (usage.output as f64 / 1000.0) * self.output_cost_per_1k);
        ((raw * 1_000_000.0).round() / 1_000_000.0).max(0.0)
    }

    /// Clamps a requested completion size to what the model allows.
    #[must_use]
    pub fn clamp_max_tokens(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_output_tokens)
    }
}

/// A caller's request for generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Kind of work requested.
    pub task_type: TaskType,
    /// Document text or question.
    pub content: String,
    /// System prompt override.
    pub system_prompt: Option<String>,
    /// User prompt override; replaces `content` as the prompt body.
    pub user_prompt: Option<String>,
    /// Explicit model name, bypassing task-based selection.
    pub model: Option<String>,
    /// Selection table column; `Default` when unset.
    pub tier: Option<ModelTier>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Requesting user.
    pub user_id: Option<String>,
    /// Requesting organization.
    pub organization_id: Option<String>,
    /// Identifier carried through logs and results.
    pub correlation_id: String,
}

impl GenerationRequest {
    /// Creates a request with default sampling and a fresh correlation id.
    pub fn new<T: Into<String>>(task_type: TaskType, content: T) -> Self {
        Self {
            task_type,
            content: content.into(),
            system_prompt: None,
            user_prompt: None,
            model: None,
            tier: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            user_id: None,
            organization_id: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Sets the system prompt override.
    #[must_use]
    pub fn with_system_prompt<T: Into<String>>(mut self, prompt: T) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the user prompt override.
    #[must_use]
    pub fn with_user_prompt<T: Into<String>>(mut self, prompt: T) -> Self {
        self.user_prompt = Some(prompt.into());
        self
    }

    /// Pins the request to a model.
    #[must_use]
    pub fn with_model<T: Into<String>>(mut self, model: T) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Selects a tier of the task table.
    #[must_use]
    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the completion token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Attributes the request to a user.
    #[must_use]
    pub fn for_user<T: Into<String>>(mut self, user_id: T) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attributes the request to an organization.
    #[must_use]
    pub fn for_organization<T: Into<String>>(mut self, organization_id: T) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Uses a caller-supplied correlation id.
    #[must_use]
    pub fn with_correlation_id<T: Into<String>>(mut self, correlation_id: T) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Normalized outcome of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Correlation id of the request that produced this result.
    pub correlation_id: String,
    /// Generated text; empty on failure.
    pub content: String,
    /// Provider that produced the text, or the last one attempted.
    pub provider_used: ProviderKind,
    /// Model that produced the text, or the last one attempted.
    pub model_used: String,
    /// Token counts reported by the provider.
    pub usage: TokenUsage,
    /// Cost computed from the model's rates.
    pub cost_usd: f64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// When the result was produced.
    pub created_at: DateTime<Utc>,
    /// Failure summary, when every attempt failed.
    pub error: Option<String>,
    /// Number of adapter calls made.
    pub attempts: u32,
    /// Whether the payload came from the response cache.
    #[serde(default)]
    pub cached: bool,
}

impl GenerationResult {
    /// Whether generation produced text.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Uniform request handed to a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// User prompt.
    pub prompt: String,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Uniform response returned by a provider adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text.
    pub content: String,
    /// Token counts reported by the vendor.
    pub usage: TokenUsage,
    /// Vendor-specific extras (finish reason, response id).
    pub metadata: HashMap<String, Value>,
}

/// Result of a live health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Checked vendor.
    pub provider: ProviderKind,
    /// Whether the check call succeeded.
    pub available: bool,
    /// Check round-trip time.
    pub latency_ms: u64,
    /// Models the adapter is configured to serve.
    pub models: Vec<String>,
    /// Check failure, if any.
    pub error: Option<String>,
}

/// Final accounting for a completed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Correlation id of the request.
    pub correlation_id: String,
    /// Provider that streamed the text.
    pub provider_used: ProviderKind,
    /// Model that streamed the text.
    pub model_used: String,
    /// Estimated token counts.
    pub usage: TokenUsage,
    /// Cost computed from the estimate.
    pub cost_usd: f64,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

/// One item of an orchestrated stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamChunk {
    /// A piece of generated text.
    Delta(String),
    /// The stream finished normally.
    Done(StreamSummary),
    /// The stream stopped on a failure; nothing follows.
    Error(String),
}
