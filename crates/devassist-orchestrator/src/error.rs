use core::result::Result as CoreResult;

use devassist_core::{Error as CoreError, TaskType};
use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = CoreResult<T, OrchestratorError>;

/// Failures the orchestrator surfaces as `Err`.
///
/// Provider failures never appear here: they end up in
/// [`GenerationResult::error`](devassist_core::GenerationResult::error).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No usable provider or model is configured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No template with this name exists for the task type.
    #[error("Template not found: {task_type}/{name}")]
    TemplateNotFound {
        /// Namespace searched.
        task_type: TaskType,
        /// Name requested.
        name: String,
    },

    /// A declared template variable was not supplied.
    #[error("Missing template variable: {0}")]
    MissingVariable(String),

    /// Template registration failed validation.
    #[error("Invalid template: {}", .0.join("; "))]
    InvalidTemplate(Vec<String>),

    /// A core operation (config, store, serialization) failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}
