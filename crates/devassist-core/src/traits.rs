use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ProviderError;
use crate::types::{HealthStatus, ModelDescriptor, ProviderKind, ProviderRequest, ProviderResponse};

/// Finite, non-restartable sequence of generated text pieces.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Uniform capability contract every LLM vendor adapter implements.
///
/// Adapters classify failures into [`ProviderError`] and never decide on
/// cross-provider fallback.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Vendor this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// Models this adapter is configured to serve. Static, no network.
    fn model_catalog(&self) -> Vec<ModelDescriptor>;

    /// Looks up one model of the catalog by name.
    fn descriptor(&self, model: &str) -> Option<ModelDescriptor> {
        self.model_catalog()
            .into_iter()
            .find(|descriptor| descriptor.name == model)
    }

    /// Whether the adapter serves the named model.
    fn serves(&self, model: &str) -> bool {
        self.descriptor(model).is_some()
    }

    /// Produces a complete response.
    ///
    /// # Errors
    ///
    /// Returns the classified vendor failure.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Opens a stream of text pieces.
    ///
    /// Models without streaming support yield their full text as one piece.
    ///
    /// # Errors
    ///
    /// Returns the classified vendor failure if the stream cannot be opened.
    async fn generate_stream(&self, request: &ProviderRequest) -> Result<TextStream, ProviderError>;

    /// Performs a minimal live call to check reachability and key validity.
    async fn check_health(&self) -> HealthStatus;
}
