//! Application-wide model context.
//!
//! Call sites that only need "the model" use [`AppContext::default_model`];
//! provider selection details stay inside the registry.

use tracing::info;

pub use crate::llm::{ModelHandle, Provider, ProviderRegistry, ProviderStatus};

/// Default model and provider, resolved once at startup.
#[derive(Clone)]
pub struct AppContext {
    registry: ProviderRegistry,
    current_provider: Provider,
    default_model: ModelHandle,
}

impl AppContext {
    /// Resolve the current provider and its primary model once.
    ///
    /// Later changes to the environment do not affect the returned context.
    pub fn from_registry(registry: ProviderRegistry) -> Self {
        let current_provider = registry.current_provider();
        let default_model = registry.create_model(Some(current_provider), false);

        info!(
            provider = %current_provider,
            model = default_model.model_id(),
            "AI provider configured"
        );

        Self {
            registry,
            current_provider,
            default_model,
        }
    }

    pub fn default_model(&self) -> &ModelHandle {
        &self.default_model
    }

    /// Provider resolved at startup.
    pub fn current_provider(&self) -> Provider {
        self.current_provider
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Build a model for an explicit provider or fallback choice.
    ///
    /// With no override this is the startup default.
    pub fn create_model(&self, provider: Option<Provider>, use_fallback: bool) -> ModelHandle {
        match provider {
            None if !use_fallback => self.default_model.clone(),
            None => self
                .registry
                .create_model(Some(self.current_provider), true),
            Some(provider) => self.registry.create_model(Some(provider), use_fallback),
        }
    }

    /// Credential check for the startup provider.
    pub fn validate(&self) -> ProviderStatus {
        self.registry
            .validate_provider_setup(Some(self.current_provider))
    }
}
