use devassist_core::{HealthStatus, LlmProvider, ProviderRequest};
use tokio::time::Instant;
use tracing::debug;

/// Checks a provider with a 1-token completion against its first model.
pub async fn check<P: LlmProvider + ?Sized>(provider: &P) -> HealthStatus {
    let catalog = provider.model_catalog();
    let models: Vec<String> = catalog.iter().map(|descriptor| descriptor.name.clone()).collect();
    let Some(first) = catalog.first() else {
        return HealthStatus {
            provider: provider.kind(),
            available: false,
            latency_ms: 0,
            models,
            error: Some("No models configured".to_owned()),
        };
    };

    let request = ProviderRequest {
        model: first.name.clone(),
        prompt: "ping".to_owned(),
        system_prompt: None,
        max_tokens: 1,
        temperature: 0.0,
    };
    let start = Instant::now();
    let outcome = provider.generate(&request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    debug!(
        "Health check for {} via {} took {latency_ms}ms",
        provider.kind(),
        first.name
    );

    HealthStatus {
        provider: provider.kind(),
        available: outcome.is_ok(),
        latency_ms,
        models,
        error: outcome.err().map(|error| error.to_string()),
    }
}
