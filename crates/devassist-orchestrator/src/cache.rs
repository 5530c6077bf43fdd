//! Content-addressed response cache over the shared key-value store.
//!
//! Caching is best-effort: store failures are logged and the request goes
//! on as a miss.

use core::time::Duration;
use std::sync::Arc;

use devassist_core::config::CacheConfig;
use devassist_core::{GenerationRequest, GenerationResult, KeyValueStore};
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

/// Prefix of every cache key.
pub const CACHE_KEY_PREFIX: &str = "llm:cache:";
/// Unit separator between hashed fields.
const FIELD_SEPARATOR: [u8; 1] = [0x1f];

/// Successful generation results keyed by request content.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    /// Creates a cache over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            enabled: config.enabled,
        }
    }

    /// Cache key: SHA-256 over task type, content, system and user prompt.
    pub fn key_for(request: &GenerationRequest) -> String {
        let mut hasher = Sha256::new();
        for (index, field) in [
            request.task_type.as_str(),
            request.content.as_str(),
            request.system_prompt.as_deref().unwrap_or_default(),
            request.user_prompt.as_deref().unwrap_or_default(),
        ]
        .into_iter()
        .enumerate()
        {
            if index > 0 {
                hasher.update(FIELD_SEPARATOR);
            }
            hasher.update(field.as_bytes());
        }
        format!("{CACHE_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
    }

    /// Cached result for this request, if any.
    pub async fn get(&self, request: &GenerationRequest) -> Option<GenerationResult> {
        if !self.enabled {
            return None;
        }
        let key = Self::key_for(request);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Cache miss for {}", request.correlation_id);
                return None;
            }
            Err(error) => {
                warn!("Cache lookup failed, continuing without cache: {error}");
                return None;
            }
        };
        match serde_json::from_str::<GenerationResult>(&raw) {
            Ok(result) => {
                debug!("Cache hit for {}", request.correlation_id);
                Some(result)
            }
            Err(error) => {
                warn!("Discarding unreadable cache entry {key}: {error}");
                None
            }
        }
    }

    /// Stores a successful result; failures are never cached.
    pub async fn put(&self, request: &GenerationRequest, result: &GenerationResult) {
        if !self.enabled || !result.is_success() {
            return;
        }
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("Could not serialize result for cache: {error}");
                return;
            }
        };
        if let Err(error) = self
            .store
            .set(&Self::key_for(request), payload, Some(self.ttl))
            .await
        {
            warn!("Cache write failed: {error}");
        }
    }
}
