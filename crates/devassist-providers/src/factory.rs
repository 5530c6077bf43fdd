//! Adapter construction from deployment configuration.

use core::time::Duration;
use std::sync::Arc;

use devassist_core::config::ProvidersConfig;
use devassist_core::{LlmProvider, ModelDescriptor, ProviderError, ProviderKind};
use tracing::warn;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::openai::OpenAiProvider;

/// Transport and catalog settings handed to an adapter.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Vendor API base URL; the public endpoint when `None`
    pub base_url: Option<String>,
    /// Models to serve, in preference order; whole catalog when `None`
    pub models: Option<Vec<String>>,
    /// HTTP timeout per call
    pub timeout: Duration,
    /// Courtesy spacing between calls to one model
    pub min_interval: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            models: None,
            timeout: Duration::from_secs(90),
            min_interval: Duration::from_millis(200),
        }
    }
}

impl AdapterOptions {
    /// Reads one vendor's block of the providers configuration.
    pub fn from_config(providers: &ProvidersConfig, kind: ProviderKind) -> Self {
        let vendor = providers.vendor(kind);
        Self {
            base_url: vendor.base_url.clone(),
            models: vendor.models.clone(),
            timeout: providers.request_timeout(),
            min_interval: providers.min_request_interval(),
        }
    }

    /// Serves only the named models.
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Points the adapter at another endpoint.
    #[must_use]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Disables the courtesy throttle.
    #[must_use]
    pub const fn without_throttle(mut self) -> Self {
        self.min_interval = Duration::ZERO;
        self
    }
}

/// Full pricing table of a vendor, before configuration filtering.
pub fn vendor_catalog(kind: ProviderKind) -> Vec<ModelDescriptor> {
    match kind {
        ProviderKind::OpenAi => OpenAiProvider::full_catalog(),
        ProviderKind::Anthropic => AnthropicProvider::full_catalog(),
        ProviderKind::Google => GoogleProvider::full_catalog(),
    }
}

/// Restricts a vendor table to the configured models, in configured order.
///
/// Unknown names are logged and skipped; an empty list yields no models.
pub fn filter_catalog(full: Vec<ModelDescriptor>, models: Option<&[String]>) -> Vec<ModelDescriptor> {
    let Some(models) = models else {
        return full;
    };
    models
        .iter()
        .filter_map(|name| {
            let found = full.iter().find(|descriptor| &descriptor.name == name).cloned();
            if found.is_none() {
                warn!("Ignoring unknown model {name} in provider configuration");
            }
            found
        })
        .collect()
}

/// Builds the adapter for `kind`.
///
/// # Errors
/// Returns [`ProviderError::InvalidCredentials`] for an empty key, or
/// [`ProviderError::Failed`] if the HTTP client cannot be built.
pub fn build_provider(
    kind: ProviderKind,
    api_key: String,
    options: AdapterOptions,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    Ok(match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key, options)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key, options)?),
        ProviderKind::Google => Arc::new(GoogleProvider::new(api_key, options)?),
    })
}
