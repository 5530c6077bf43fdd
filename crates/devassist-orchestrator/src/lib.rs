//! Orchestration layer: model selection, retry and fallback across vendors,
//! response caching, spend accounting and prompt templates.
#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Test allows"
    )
)]

/// Response cache.
pub mod cache;
/// Error types.
pub mod error;
/// The orchestrator itself.
pub mod orchestrator;
/// Prompt templates.
pub mod prompts;
/// Provider registry.
pub mod registry;
/// Retry policy.
pub mod retry;
/// Model selection.
pub mod selection;
/// Usage accounting.
pub mod usage;

pub use cache::ResponseCache;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{ChunkStream, LIMIT_EXCEEDED, Orchestrator};
pub use prompts::{DEFAULT_TEMPLATE, PromptManager, PromptTemplate};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use selection::{ModelSelector, Selection, SelectionReason, default_model};
pub use usage::{
    DailyUsage, RealtimeSnapshot, UsageQuery, UsageRecord, UsageReport, UsageSummary,
    UsageTotals, UsageTracker,
};
