//! Provider router — named providers, the switchable primary target, and the
//! shared rate gate they all draw from.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chorus_core::capability::ProviderStatus;
use chorus_core::error::ProviderError;
use chorus_core::provider::Provider;
use tracing::info;

use crate::gate::RateGate;
use crate::gated::GatedProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// The provider and model answering primary calls.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryTarget {
    pub provider: String,
    pub model: String,
}

/// Routes model calls to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    primary: RwLock<PrimaryTarget>,
    gate: Arc<RateGate>,
}

impl ProviderRouter {
    /// Create a new router with a primary target and a shared gate.
    pub fn new(primary_provider: impl Into<String>, primary_model: impl Into<String>, gate: Arc<RateGate>) -> Self {
        Self {
            providers: HashMap::new(),
            primary: RwLock::new(PrimaryTarget {
                provider: primary_provider.into(),
                model: primary_model.into(),
            }),
            gate,
        }
    }

    /// Register a provider. It should already be gated.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(format!("Unknown provider '{name}'")))
    }

    /// The provider and model currently answering primary calls.
    pub fn primary(&self) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        let target = self.primary_target();
        Ok((self.get(&target.provider)?, target.model))
    }

    /// The primary selection read under a single lock, so the name and
    /// model always belong to the same switch.
    pub fn primary_target(&self) -> PrimaryTarget {
        self.primary.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Point primary calls at another registered provider, optionally
    /// changing the model too.
    pub fn switch_primary(&self, provider: &str, model: Option<&str>) -> Result<(), ProviderError> {
        if !self.providers.contains_key(provider) {
            return Err(ProviderError::NotConfigured(format!(
                "Unknown provider '{provider}'"
            )));
        }
        let mut target = self.primary.write().unwrap_or_else(|p| p.into_inner());
        target.provider = provider.to_string();
        if let Some(model) = model {
            target.model = model.to_string();
        }
        info!(provider = %target.provider, model = %target.model, "Primary provider switched");
        Ok(())
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn status(&self) -> ProviderStatus {
        let target = self.primary_target();
        let gate = self.gate.state();
        let mut available: Vec<String> = self.providers.keys().cloned().collect();
        available.sort();
        ProviderStatus {
            provider: target.provider,
            model: target.model,
            available,
            calls_made: gate.count,
            call_cap: gate.cap,
        }
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build gated providers for every provider the config mentions.
pub fn build_from_config(config: &chorus_config::HostConfig) -> ProviderRouter {
    let gate = Arc::new(RateGate::new(config.gate.cap));
    let mut router = ProviderRouter::new(
        &config.primary.provider,
        &config.primary.model,
        gate.clone(),
    );

    for name in config.referenced_providers() {
        let provider_config = config.provider(&name);
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(&name));

        let adapter = Arc::new(OpenAiCompatProvider::new(&name, &base_url, &api_key));
        let gated = GatedProvider::new(adapter, gate.clone())
            .with_timeout(Duration::from_secs(provider_config.timeout_secs))
            .with_max_retries(provider_config.max_retries);

        router.register(name, Arc::new(gated));
    }

    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let gate = Arc::new(RateGate::new(5));
        let mut router = ProviderRouter::new("openrouter", "m", gate);
        router.register("openrouter", Arc::new(OpenAiCompatProvider::openrouter("sk-test")));

        assert!(router.get("openrouter").is_ok());
        assert!(router.get("nonexistent").is_err());
        assert!(router.primary().is_ok());
    }

    #[test]
    fn switch_primary_requires_known_provider() {
        let gate = Arc::new(RateGate::new(5));
        let mut router = ProviderRouter::new("openrouter", "m1", gate);
        router.register("openrouter", Arc::new(OpenAiCompatProvider::openrouter("k")));
        router.register("ollama", Arc::new(OpenAiCompatProvider::ollama(None)));

        assert!(router.switch_primary("missing", None).is_err());
        router.switch_primary("ollama", Some("llama3")).unwrap();

        assert_eq!(
            router.primary_target(),
            PrimaryTarget {
                provider: "ollama".into(),
                model: "llama3".into()
            }
        );

        let status = router.status();
        assert_eq!(status.provider, "ollama");
        assert_eq!(status.model, "llama3");
        assert_eq!(status.available, vec!["ollama".to_string(), "openrouter".to_string()]);
        assert_eq!(status.call_cap, 5);
    }

    #[test]
    fn build_from_default_config() {
        let config = chorus_config::HostConfig::default();
        let router = build_from_config(&config);
        assert!(router.primary().is_ok());
        assert_eq!(router.gate().state().cap, config.gate.cap);
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }
}
