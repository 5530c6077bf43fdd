//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use devassist_core::{
    DevAssistConfig, KeyValueStore, MemoryStore, ProviderKind, StoreError, StoreResult,
};
use devassist_orchestrator::{Orchestrator, ProviderRegistry, UsageRecord};
use devassist_providers::MockProvider;

/// Store whose every operation fails, like an unreachable Redis.
pub struct FailingStore;

fn unavailable<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_owned()))
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        unavailable()
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> StoreResult<()> {
        unavailable()
    }

    async fn incr_by_float(
        &self,
        _key: &str,
        _delta: f64,
        _ttl: Option<Duration>,
    ) -> StoreResult<f64> {
        unavailable()
    }

    async fn push(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> StoreResult<()> {
        unavailable()
    }

    async fn list(&self, _key: &str) -> StoreResult<Vec<String>> {
        unavailable()
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        unavailable()
    }
}

/// Registry over mock handles, in the configured priority order.
pub fn registry(config: &DevAssistConfig, providers: &[&MockProvider]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(config.providers.priority.clone());
    for provider in providers {
        registry.register(Arc::new((*provider).clone()));
    }
    registry
}

/// Orchestrator over mocks and a fresh in-memory store.
pub fn orchestrator(config: &DevAssistConfig, providers: &[&MockProvider]) -> Orchestrator {
    Orchestrator::new(config, registry(config, providers), Arc::new(MemoryStore::new()))
}

/// Orchestrator over mocks and an explicit store.
pub fn orchestrator_with_store(
    config: &DevAssistConfig,
    providers: &[&MockProvider],
    store: Arc<dyn KeyValueStore>,
) -> Orchestrator {
    Orchestrator::new(config, registry(config, providers), store)
}

/// Configuration with a custom priority order.
pub fn config_with_priority(priority: &[ProviderKind]) -> DevAssistConfig {
    let mut config = DevAssistConfig::default();
    config.providers.priority = priority.to_vec();
    config
}

/// Usage records written today, after flushing background writes.
pub async fn records_today(orchestrator: &Orchestrator) -> Vec<UsageRecord> {
    orchestrator.flush_usage().await;
    orchestrator
        .tracker()
        .records(Utc::now().date_naive())
        .await
        .unwrap_or_default()
}
