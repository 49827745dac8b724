//! Provider registry: static provider table, current-provider resolution and
//! model construction.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::anthropic::AnthropicProvider;
use super::handle::ModelHandle;
use super::openai::OpenAICompatibleProvider;
use super::provider::Provider;

/// Environment variable selecting the active provider.
pub const PROVIDER_ENV: &str = "PROVIDER";
/// Environment variable used as the OpenRouter `HTTP-Referer`.
pub const APP_URL_ENV: &str = "APP_URL";

const DEFAULT_APP_URL: &str = "http://localhost:3000";
const APP_TITLE: &str = "AI Builder App";

/// Model identifiers offered by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelIds {
    pub primary: &'static str,
    pub fallback: Option<&'static str>,
}

/// Static configuration for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderConfig {
    pub name: Provider,
    pub models: ModelIds,
    /// Environment variable holding the provider's API key.
    pub api_key_env: &'static str,
}

impl ProviderConfig {
    /// Model id to use, honoring `use_fallback` only when a fallback exists.
    pub fn model_id(&self, use_fallback: bool) -> &'static str {
        match self.models.fallback {
            Some(fallback) if use_fallback => fallback,
            _ => self.models.primary,
        }
    }

    /// Default API base URL for the provider.
    pub fn default_base_url(&self) -> &'static str {
        match self.name {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::OpenAI => "https://api.openai.com/v1",
        }
    }
}

const ANTHROPIC: ProviderConfig = ProviderConfig {
    name: Provider::Anthropic,
    models: ModelIds {
        primary: "claude-4-sonnet-20250514",
        fallback: Some("claude-3-7-sonnet-20250219"),
    },
    api_key_env: "ANTHROPIC_API_KEY",
};

const OPENROUTER: ProviderConfig = ProviderConfig {
    name: Provider::OpenRouter,
    models: ModelIds {
        primary: "anthropic/claude-3.5-sonnet",
        fallback: Some("meta-llama/llama-3.1-70b-instruct"),
    },
    api_key_env: "OPENROUTER_API_KEY",
};

const OPENAI: ProviderConfig = ProviderConfig {
    name: Provider::OpenAI,
    models: ModelIds {
        primary: "gpt-5-2025-08-07",
        fallback: Some("gpt-4.1-2025-04-14"),
    },
    api_key_env: "OPENAI_API_KEY",
};

/// Static config for `provider`.
pub fn config_for(provider: Provider) -> &'static ProviderConfig {
    match provider {
        Provider::Anthropic => &ANTHROPIC,
        Provider::OpenRouter => &OPENROUTER,
        Provider::OpenAI => &OPENAI,
    }
}

/// Outcome of checking a provider's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lookup function for environment variables.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves providers from the environment and builds model handles.
#[derive(Clone)]
pub struct ProviderRegistry {
    client: Client,
    env: EnvLookup,
    base_urls: HashMap<Provider, String>,
}

impl ProviderRegistry {
    /// Registry reading the process environment on every lookup.
    pub fn from_env() -> Self {
        Self::with_env(Arc::new(|key: &str| std::env::var(key).ok()))
    }

    /// Registry reading variables through `env`.
    pub fn with_env(env: EnvLookup) -> Self {
        Self {
            client: Client::new(),
            env,
            base_urls: HashMap::new(),
        }
    }

    /// Point `provider` at a different API base URL.
    #[must_use]
    pub fn with_base_url(mut self, provider: Provider, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(provider, base_url.into());
        self
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    /// Provider named by `PROVIDER` (case-insensitive), else Anthropic.
    pub fn current_provider(&self) -> Provider {
        match self.var(PROVIDER_ENV) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                debug!(value = %value, "unrecognized PROVIDER, using default");
                Provider::default()
            }),
            None => Provider::default(),
        }
    }

    /// Config for `provider`, or for the current provider when `None`.
    pub fn provider_config(&self, provider: Option<Provider>) -> &'static ProviderConfig {
        config_for(provider.unwrap_or_else(|| self.current_provider()))
    }

    /// Build a model handle for `provider` (current provider when `None`).
    pub fn create_model(&self, provider: Option<Provider>, use_fallback: bool) -> ModelHandle {
        let config = self.provider_config(provider);
        let model_id = config.model_id(use_fallback);
        let base_url = self
            .base_urls
            .get(&config.name)
            .cloned()
            .unwrap_or_else(|| config.default_base_url().to_string());
        let api_key = self.var(config.api_key_env);

        match config.name {
            Provider::Anthropic => {
                let client = AnthropicProvider::new(
                    self.client.clone(),
                    api_key.unwrap_or_default(),
                    base_url.clone(),
                );
                ModelHandle::new(config.name, model_id, base_url, Arc::new(client))
            }
            Provider::OpenRouter => {
                let headers = vec![
                    (
                        "HTTP-Referer".to_string(),
                        self.var(APP_URL_ENV)
                            .filter(|v| !v.is_empty())
                            .unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
                    ),
                    ("X-Title".to_string(), APP_TITLE.to_string()),
                ];
                let client =
                    OpenAICompatibleProvider::new(self.client.clone(), base_url.clone(), api_key)
                        .with_headers(headers.clone());
                ModelHandle::new(config.name, model_id, base_url, Arc::new(client))
                    .with_headers(headers)
            }
            Provider::OpenAI => {
                let client =
                    OpenAICompatibleProvider::new(self.client.clone(), base_url.clone(), api_key);
                ModelHandle::new(config.name, model_id, base_url, Arc::new(client))
            }
        }
    }

    /// Check that the credential variable for `provider` is set and non-empty.
    pub fn validate_provider_setup(&self, provider: Option<Provider>) -> ProviderStatus {
        let config = self.provider_config(provider);
        let present = self
            .var(config.api_key_env)
            .is_some_and(|key| !key.is_empty());

        ProviderStatus {
            provider: config.name,
            is_valid: present,
            error: (!present).then(|| format!("Missing API key: {} is not set", config.api_key_env)),
        }
    }
}
