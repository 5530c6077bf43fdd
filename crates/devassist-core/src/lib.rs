//! Core types and traits for the `DevAssist` LLM orchestration layer.
//!
//! This crate holds the request/result model, the provider error taxonomy,
//! the provider capability trait, the key-value store abstraction and the
//! deployment configuration shared by every other crate in the workspace.
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

/// Deployment configuration.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Key-value store trait and the in-memory implementation.
pub mod store;
/// Lock helpers.
pub mod sync;
/// Trait definitions for provider adapters.
pub mod traits;
/// Request, result and catalog types.
pub mod types;

pub use config::DevAssistConfig;
pub use error::{Error, ProviderError, Result, StoreError, StoreResult};
pub use store::{KeyValueStore, MemoryStore};
pub use traits::{LlmProvider, TextStream};
pub use types::{
    GenerationRequest, GenerationResult, HealthStatus, ModelDescriptor, ModelTier, ProviderKind,
    ProviderRequest, ProviderResponse, StreamChunk, StreamSummary, TaskType, TokenUsage,
    estimate_tokens,
};
