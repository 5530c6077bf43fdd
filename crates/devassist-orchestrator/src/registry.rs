//! Provider registry for the adapters a deployment can reach.
//!
//! Adapters are built once from configuration and shared by every request;
//! the registry also owns the provider priority order used for fallback.

use std::collections::HashMap;
use std::sync::Arc;

use devassist_core::{DevAssistConfig, LlmProvider, ModelDescriptor, ProviderKind};
use devassist_providers::{AdapterOptions, build_provider};
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

/// Registered adapters plus the order in which they are tried.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    /// Fallback order; registered kinds missing from it are appended
    priority: Vec<ProviderKind>,
    /// Adapter per vendor
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry with the given priority order.
    pub fn new(priority: Vec<ProviderKind>) -> Self {
        Self {
            priority,
            providers: HashMap::new(),
        }
    }

    /// Builds adapters for every enabled vendor that has an API key.
    ///
    /// Vendors without a key are skipped; an empty registry is not an error
    /// here, selection reports it per request.
    ///
    /// # Errors
    /// Returns an error if an adapter cannot be constructed.
    pub fn from_config(config: &DevAssistConfig) -> Result<Self> {
        let mut registry = Self::new(config.providers.priority.clone());

        for kind in ProviderKind::all() {
            if !config.providers.vendor(kind).enabled {
                debug!("Provider {kind} disabled in configuration");
                continue;
            }
            let Some(api_key) = config.get_api_key(kind) else {
                info!(
                    "Provider {kind} not registered: no API key in config or {}",
                    kind.api_key_env()
                );
                continue;
            };
            let options = AdapterOptions::from_config(&config.providers, kind);
            let provider = build_provider(kind, api_key, options).map_err(|error| {
                OrchestratorError::Configuration(format!("Failed to build {kind} adapter: {error}"))
            })?;
            registry.register(provider);
        }

        Ok(registry)
    }

    /// Adds or replaces the adapter for its vendor.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let kind = provider.kind();
        if !self.priority.contains(&kind) {
            self.priority.push(kind);
        }
        debug!(
            "Registered provider {kind} with {} model(s)",
            provider.model_catalog().len()
        );
        self.providers.insert(kind, provider);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Adapter for a vendor, if registered.
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&kind).map(Arc::clone)
    }

    /// Registered adapters in priority order.
    pub fn ordered(&self) -> Vec<Arc<dyn LlmProvider>> {
        self.priority
            .iter()
            .filter_map(|kind| self.get(*kind))
            .collect()
    }

    /// First adapter in priority order serving `model`.
    pub fn find_model(&self, model: &str) -> Option<(Arc<dyn LlmProvider>, ModelDescriptor)> {
        self.ordered().into_iter().find_map(|provider| {
            let descriptor = provider.descriptor(model)?;
            Some((provider, descriptor))
        })
    }

    /// Highest-priority adapter with at least one model, with its first model.
    pub fn first_available(&self) -> Option<(Arc<dyn LlmProvider>, ModelDescriptor)> {
        self.ordered().into_iter().find_map(|provider| {
            let first = provider.model_catalog().into_iter().next()?;
            Some((provider, first))
        })
    }

    /// Vendor order used for fallback.
    pub fn priority(&self) -> &[ProviderKind] {
        &self.priority
    }

    /// Whether no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
