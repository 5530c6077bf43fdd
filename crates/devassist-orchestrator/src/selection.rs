//! Model selection: explicit override, task table, then priority fallback.

use core::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use devassist_core::config::SelectionConfig;
use devassist_core::{GenerationRequest, LlmProvider, ModelDescriptor, ModelTier, TaskType};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::registry::ProviderRegistry;

const SONNET: &str = "claude-3-5-sonnet-20241022";
const HAIKU: &str = "claude-3-haiku-20240307";
const OPUS: &str = "claude-3-opus-20240229";
const GPT_4O: &str = "gpt-4o";
const GPT_4O_MINI: &str = "gpt-4o-mini";
const GEMINI_PRO: &str = "gemini-1.5-pro";
const GEMINI_FLASH: &str = "gemini-1.5-flash";

/// Built-in preferred model for a task type and tier.
pub const fn default_model(task_type: TaskType, tier: ModelTier) -> &'static str {
    let (default, fast, quality) = match task_type {
        TaskType::TextAnalysis | TaskType::RiskAssessment => (SONNET, HAIKU, OPUS),
        TaskType::DataExtraction | TaskType::Recommendation => (GPT_4O, GPT_4O_MINI, SONNET),
        TaskType::DocumentConversion => (GPT_4O_MINI, GEMINI_FLASH, GPT_4O),
        TaskType::ReportGeneration => (SONNET, GPT_4O_MINI, OPUS),
        TaskType::Comparison => (SONNET, GEMINI_FLASH, GPT_4O),
        TaskType::Search => (GEMINI_FLASH, GEMINI_FLASH, GEMINI_PRO),
    };
    match tier {
        ModelTier::Default => default,
        ModelTier::Fast => fast,
        ModelTier::Quality => quality,
    }
}

/// Which selection step produced the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// The caller named the model.
    Override,
    /// The task table's entry is served.
    TaskTable,
    /// Nobody serves the table entry; first provider in priority order.
    PriorityFallback,
}

impl Display for SelectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Override => write!(f, "override"),
            Self::TaskTable => write!(f, "task table"),
            Self::PriorityFallback => write!(f, "priority fallback"),
        }
    }
}

/// Provider and model chosen for a request.
#[derive(Clone)]
pub struct Selection {
    /// Adapter to call.
    pub provider: Arc<dyn LlmProvider>,
    /// Model to request from it.
    pub descriptor: ModelDescriptor,
    /// How the pair was chosen.
    pub reason: SelectionReason,
}

/// Picks the (provider, model) pair for a request.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    overrides: SelectionConfig,
}

impl ModelSelector {
    /// Creates a selector with configured table overrides.
    pub fn new(overrides: SelectionConfig) -> Self {
        Self { overrides }
    }

    /// Preferred model for a task and tier, with configured overrides applied.
    pub fn preferred_model(&self, task_type: TaskType, tier: ModelTier) -> String {
        self.overrides
            .model_for(task_type, tier)
            .unwrap_or_else(|| default_model(task_type, tier))
            .to_owned()
    }

    /// Selects the pair for a request.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Configuration`] when no registered
    /// provider serves any model.
    pub fn select(
        &self,
        registry: &ProviderRegistry,
        request: &GenerationRequest,
    ) -> Result<Selection> {
        if let Some(model) = &request.model {
            if let Some((provider, descriptor)) = registry.find_model(model) {
                debug!("Using requested model {model} on {}", provider.kind());
                return Ok(Selection {
                    provider,
                    descriptor,
                    reason: SelectionReason::Override,
                });
            }
            warn!("Requested model {model} is not served by any provider; selecting by task");
        }

        let tier = request.tier.unwrap_or_default();
        let preferred = self.preferred_model(request.task_type, tier);
        if let Some((provider, descriptor)) = registry.find_model(&preferred) {
            debug!(
                "Task {} ({tier}) maps to {preferred} on {}",
                request.task_type,
                provider.kind()
            );
            return Ok(Selection {
                provider,
                descriptor,
                reason: SelectionReason::TaskTable,
            });
        }

        let (provider, descriptor) = registry.first_available().ok_or_else(|| {
            OrchestratorError::Configuration(if registry.is_empty() {
                "No LLM providers are registered".to_owned()
            } else {
                "No registered LLM provider has any model configured".to_owned()
            })
        })?;
        debug!(
            "{preferred} unavailable for task {}; falling back to {}/{}",
            request.task_type,
            provider.kind(),
            descriptor.name
        );
        Ok(Selection {
            provider,
            descriptor,
            reason: SelectionReason::PriorityFallback,
        })
    }
}
