//! Provider registry: resolves a session's model selection to a provider.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use palette_core::config::Config;
use palette_core::session::ModelSelection;

use crate::openai::OpenAiProvider;
use crate::{Credentials, LlmProvider, ProviderFailure};

struct RegisteredProvider {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    default_model: Option<String>,
}

/// A provider ready to stream, with the model it should use.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider: Arc<dyn LlmProvider>,
    pub credentials: Credentials,
    pub model: String,
}

pub struct ProviderRegistry {
    providers: HashMap<String, RegisteredProvider>,
    default_id: String,
    default_model: String,
}

impl ProviderRegistry {
    /// Empty registry; `default_id` is used when a selection names no provider.
    pub fn new(default_id: String) -> Self {
        Self {
            providers: HashMap::new(),
            default_id,
            default_model: "gpt-4o".into(),
        }
    }

    /// Build every configured provider. The first configured provider is the default.
    pub fn from_config(config: &Config) -> Self {
        let default_id = config
            .first_provider()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| "none".into());
        let mut registry = Self::new(default_id);
        registry.default_model = config.default_model();

        for pc in config.providers() {
            let provider: Arc<dyn LlmProvider> = match pc.id.as_str() {
                "openai" => Arc::new(OpenAiProvider::openai(pc.base_url.as_deref())),
                "openrouter" => Arc::new(OpenAiProvider::openrouter(pc.base_url.as_deref())),
                "ollama" => Arc::new(OpenAiProvider::ollama(pc.base_url.as_deref())),
                other => match pc.base_url.as_deref() {
                    Some(base_url) => Arc::new(OpenAiProvider::compatible(other, base_url)),
                    None => {
                        warn!(provider = other, "Unknown provider without base_url, skipping");
                        continue;
                    }
                },
            };
            let credentials = match pc.resolve_api_key() {
                Some(api_key) => Credentials::ApiKey { api_key },
                None => Credentials::None,
            };
            info!(provider = %pc.id, "Registered provider");
            registry.register(provider, credentials, pc.default_model.clone());
        }
        registry
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        default_model: Option<String>,
    ) {
        self.providers.insert(
            provider.id().to_string(),
            RegisteredProvider {
                provider,
                credentials,
                default_model,
            },
        );
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a selection: explicit provider/model first, then the defaults.
    pub fn resolve(&self, selection: &ModelSelection) -> Result<ResolvedModel, ProviderFailure> {
        let id = selection.provider.as_deref().unwrap_or(&self.default_id);
        let entry = self
            .providers
            .get(id)
            .ok_or_else(|| ProviderFailure::provider(format!("Unknown provider '{id}'")))?;

        let model = selection
            .model
            .clone()
            .or_else(|| entry.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone());

        Ok(ResolvedModel {
            provider: entry.provider.clone(),
            credentials: entry.credentials.clone(),
            model,
        })
    }
}
