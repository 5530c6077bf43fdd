//! Prompt templates and their registry.

/// Template registry.
pub mod manager;
/// Template type, validation and rendering.
pub mod template;

pub use manager::{DEFAULT_TEMPLATE, PromptManager};
pub use template::PromptTemplate;
