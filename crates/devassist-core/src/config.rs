//! Deployment configuration for providers, failover, caching, limits and prompts.

use core::time::Duration;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{ModelTier, ProviderKind, TaskType};

/// Complete orchestration configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevAssistConfig {
    /// API keys for the vendors
    pub api_keys: ApiKeys,
    /// Provider registration and transport settings
    pub providers: ProvidersConfig,
    /// Retry and fallback settings
    pub failover: FailoverConfig,
    /// Response cache settings
    pub cache: CacheConfig,
    /// Spend limit settings
    pub limits: LimitsConfig,
    /// Model selection table overrides
    pub selection: SelectionConfig,
    /// Prompt template sources
    pub prompts: PromptsConfig,
}

/// API keys for the vendors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    /// `OpenAI` API key
    pub openai_api_key: Option<String>,
    /// Anthropic API key
    pub anthropic_api_key: Option<String>,
    /// Google AI Studio API key
    pub google_api_key: Option<String>,
}

/// Provider registration and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Order in which providers are tried on fallback
    pub priority: Vec<ProviderKind>,
    /// Upper bound on a single provider call
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive calls to one model
    pub min_request_interval_ms: u64,
    /// `OpenAI` settings
    pub openai: VendorSettings,
    /// Anthropic settings
    pub anthropic: VendorSettings,
    /// Google settings
    pub google: VendorSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            priority: ProviderKind::all().to_vec(),
            request_timeout_secs: 90,
            min_request_interval_ms: 200,
            openai: VendorSettings::default(),
            anthropic: VendorSettings::default(),
            google: VendorSettings::default(),
        }
    }
}

impl ProvidersConfig {
    /// Settings block for one vendor.
    pub const fn vendor(&self, kind: ProviderKind) -> &VendorSettings {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Google => &self.google,
        }
    }

    /// Mutable settings block for one vendor.
    pub const fn vendor_mut(&mut self, kind: ProviderKind) -> &mut VendorSettings {
        match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::Google => &mut self.google,
        }
    }

    /// Provider call timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Courtesy spacing between calls to one model.
    pub const fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Per-vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    /// Whether the vendor is registered when a key is present
    pub enabled: bool,
    /// Models to serve; `None` serves the whole catalog, an empty list serves nothing
    pub models: Option<Vec<String>>,
    /// Override of the vendor API base URL
    pub base_url: Option<String>,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            models: None,
            base_url: None,
        }
    }
}

/// Retry and fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Whether other providers are tried once the primary is exhausted
    pub enabled: bool,
    /// Attempts on the primary provider
    pub max_retries: u32,
    /// First rate-limit backoff, doubled per attempt
    pub initial_backoff_ms: u64,
    /// Ceiling on any single backoff
    pub max_backoff_secs: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_secs: 60,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether successful results are cached
    pub enabled: bool,
    /// Time-to-live of cached results in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Cache entry lifetime.
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Spend limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Whether the orchestrator checks limits before calling a provider
    pub enforce: bool,
    /// Daily ceiling per user in USD
    pub user_daily_usd: f64,
    /// Monthly ceiling per organization in USD
    pub org_monthly_usd: f64,
    /// Deny requests when the accounting store is unreachable
    pub fail_closed: bool,
    /// Retention of usage counters and records in days
    pub record_ttl_days: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enforce: true,
            user_daily_usd: 10.0,
            org_monthly_usd: 500.0,
            fail_closed: false,
            record_ttl_days: 30,
        }
    }
}

impl LimitsConfig {
    /// Retention of usage entries.
    pub const fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_days * 24 * 60 * 60)
    }
}

/// Model selection table overrides.
///
/// ```toml
/// [selection.overrides.search]
/// default = "gpt-4o-mini"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Per-task replacement entries
    pub overrides: BTreeMap<TaskType, TierOverride>,
}

impl SelectionConfig {
    /// Overridden model for a task and tier, if configured.
    pub fn model_for(&self, task_type: TaskType, tier: ModelTier) -> Option<&str> {
        let entry = self.overrides.get(&task_type)?;
        match tier {
            ModelTier::Default => entry.default.as_deref(),
            ModelTier::Fast => entry.fast.as_deref(),
            ModelTier::Quality => entry.quality.as_deref(),
        }
    }
}

/// Replacement models for one row of the selection table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierOverride {
    /// Model for the default tier
    pub default: Option<String>,
    /// Model for the fast tier
    pub fast: Option<String>,
    /// Model for the quality tier
    pub quality: Option<String>,
}

/// Prompt template sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Load the embedded template set
    pub builtin: bool,
    /// Extra templates in TOML form
    pub template_file: Option<PathBuf>,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            template_file: None,
        }
    }
}

impl DevAssistConfig {
    /// Get the default config directory path (`~/.devassist`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_owned()))?;
        Ok(home.join(".devassist"))
    }

    /// Get the default config file path (`~/.devassist/config.toml`)
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from the default location, creating it with defaults when missing
    ///
    /// # Errors
    /// Returns an error if the config cannot be read or created
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!(
            "Loaded config from {:?}: openai={}, anthropic={}, google={}",
            path,
            key_state(config.api_keys.openai_api_key.as_ref()),
            key_state(config.api_keys.anthropic_api_key.as_ref()),
            key_state(config.api_keys.google_api_key.as_ref()),
        );

        Ok(config)
    }

    /// Save config to a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be written
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;

        let header = "# DevAssist Configuration File\n\
                      # This file is automatically generated on first run\n\
                      # Edit this file to customize providers, limits and prompts\n\n";

        fs::write(path, format!("{header}{contents}"))?;

        Ok(())
    }

    /// Rejects settings the orchestrator cannot run with.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the offending setting
    pub fn validate(&self) -> Result<()> {
        if self.failover.max_retries == 0 {
            return Err(Error::Config("failover.max_retries must be at least 1".to_owned()));
        }
        if self.providers.request_timeout_secs == 0 {
            return Err(Error::Config(
                "providers.request_timeout_secs must be positive".to_owned(),
            ));
        }
        if self.limits.user_daily_usd < 0.0 || self.limits.org_monthly_usd < 0.0 {
            return Err(Error::Config("spend limits must not be negative".to_owned()));
        }
        let mut seen = Vec::with_capacity(self.providers.priority.len());
        for kind in &self.providers.priority {
            if seen.contains(kind) {
                return Err(Error::Config(format!(
                    "provider {kind} listed twice in providers.priority"
                )));
            }
            seen.push(*kind);
        }
        Ok(())
    }

    /// Get API key for a provider, checking config first, then environment variables
    pub fn get_api_key(&self, provider: ProviderKind) -> Option<String> {
        let configured = match provider {
            ProviderKind::OpenAi => self.api_keys.openai_api_key.clone(),
            ProviderKind::Anthropic => self.api_keys.anthropic_api_key.clone(),
            ProviderKind::Google => self.api_keys.google_api_key.clone(),
        };
        configured
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var(provider.api_key_env()).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

fn key_state(key: Option<&String>) -> &'static str {
    if key.is_some() { "present" } else { "missing" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_default_config() {
        let config = DevAssistConfig::default();
        assert_eq!(config.providers.priority, ProviderKind::all().to_vec());
        assert_eq!(config.providers.request_timeout_secs, 90);
        assert_eq!(config.failover.max_retries, 3);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(!config.limits.fail_closed);
        assert!(config.prompts.builtin);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_content = r#"
[api_keys]
anthropic_api_key = "sk-ant-test"

[providers]
priority = ["anthropic", "google"]

[providers.openai]
models = []

[providers.anthropic]
models = ["claude-3-haiku-20240307"]

[failover]
max_retries = 2

[selection.overrides.search]
quality = "gpt-4o"
"#;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(toml_content.as_bytes())
            .expect("Failed to write to temp file");

        let config = DevAssistConfig::load_from_file(temp_file.path()).expect("Failed to load");

        assert_eq!(
            config.providers.priority,
            vec![ProviderKind::Anthropic, ProviderKind::Google]
        );
        assert_eq!(config.providers.openai.models, Some(Vec::new()));
        assert_eq!(config.providers.google.models, None);
        assert_eq!(config.failover.max_retries, 2);
        assert_eq!(config.failover.max_backoff_secs, 60);
        assert_eq!(
            config.get_api_key(ProviderKind::Anthropic).as_deref(),
            Some("sk-ant-test")
        );
        assert_eq!(
            config.selection.model_for(TaskType::Search, ModelTier::Quality),
            Some("gpt-4o")
        );
        assert_eq!(
            config.selection.model_for(TaskType::Search, ModelTier::Fast),
            None
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DevAssistConfig::default();
        config.limits.fail_closed = true;
        config.providers.vendor_mut(ProviderKind::Google).enabled = false;
        config.save_to_file(&path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# DevAssist Configuration File"));

        let reloaded = DevAssistConfig::load_from_file(&path).unwrap();
        assert!(reloaded.limits.fail_closed);
        assert!(!reloaded.providers.vendor(ProviderKind::Google).enabled);
    }

    #[test]
    fn test_validation_rejects_duplicate_priority() {
        let mut config = DevAssistConfig::default();
        config.providers.priority = vec![ProviderKind::OpenAi, ProviderKind::OpenAi];
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("listed twice"));
    }

    #[test]
    fn test_validation_rejects_zero_retries() {
        let mut config = DevAssistConfig::default();
        config.failover.max_retries = 0;
        config.validate().unwrap_err();
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[providers\npriority = 3").unwrap();
        let error = DevAssistConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(matches!(error, Error::Toml(_)));
    }

    #[test]
    fn test_durations() {
        let config = DevAssistConfig::default();
        assert_eq!(config.providers.request_timeout(), Duration::from_secs(90));
        assert_eq!(config.providers.min_request_interval(), Duration::from_millis(200));
        assert_eq!(config.limits.record_ttl(), Duration::from_secs(30 * 86_400));
    }
}
