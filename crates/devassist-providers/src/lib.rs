//! Provider adapters for the LLM vendors behind `DevAssist`.
//!
//! Each adapter owns its vendor's wire format, pricing table and error
//! classification; [`build_provider`] is the only place that matches on
//! [`ProviderKind`](devassist_core::ProviderKind).
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

/// Anthropic messages API adapter.
pub mod anthropic;
/// Adapter construction.
pub mod factory;
/// Google Gemini adapter.
pub mod google;
/// Live health check shared by the adapters.
mod health;
/// Shared HTTP helpers.
pub mod http;
/// Scriptable provider for tests.
pub mod mock;
/// `OpenAI` chat completions adapter.
pub mod openai;
/// Server-sent event decoding.
pub mod sse;
/// Per-model courtesy throttle.
pub mod throttle;

pub use anthropic::AnthropicProvider;
pub use factory::{AdapterOptions, build_provider, filter_catalog, vendor_catalog};
pub use google::GoogleProvider;
pub use mock::{MockCall, MockOutcome, MockProvider, StreamEnd};
pub use openai::OpenAiProvider;
