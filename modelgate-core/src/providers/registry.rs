//! Provider registry and model routing
//!
//! The registry is built once at startup from available credentials and is
//! read-only afterwards: no dynamic registration, no hidden global state.
//! Model identifiers route to adapters by naming-prefix convention.

use crate::config::GatewayConfig;
use crate::protocol::{CompletionRequest, CompletionResponse, ProviderKind};
use crate::providers::adapter::{ChunkSink, ProviderAdapter};
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::google::GoogleAdapter;
use crate::providers::openai::OpenAiAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Read-only mapping from provider family to its adapter
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build a registry from configuration.
    ///
    /// Each provider with a present credential gets an adapter; a missing
    /// credential is logged and the provider is simply unavailable — never
    /// fatal to startup.
    pub fn from_config(config: &GatewayConfig) -> ProviderResult<Self> {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

        match &config.openai {
            Some(settings) => {
                adapters.insert(
                    ProviderKind::OpenAI,
                    Arc::new(OpenAiAdapter::new(settings)?),
                );
                info!(
                    provider = "openai",
                    key = %settings.api_key.partial_redact(),
                    "provider registered"
                );
            }
            None => info!(provider = "openai", "no credential configured, skipping"),
        }

        match &config.anthropic {
            Some(settings) => {
                adapters.insert(
                    ProviderKind::Anthropic,
                    Arc::new(AnthropicAdapter::new(settings)?),
                );
                info!(
                    provider = "anthropic",
                    key = %settings.api_key.partial_redact(),
                    "provider registered"
                );
            }
            None => info!(provider = "anthropic", "no credential configured, skipping"),
        }

        match &config.google {
            Some(settings) => {
                adapters.insert(
                    ProviderKind::Google,
                    Arc::new(GoogleAdapter::new(settings)?),
                );
                info!(
                    provider = "google",
                    key = %settings.api_key.partial_redact(),
                    "provider registered"
                );
            }
            None => info!(provider = "google", "no credential configured, skipping"),
        }

        Ok(Self { adapters })
    }

    /// Build a registry from pre-constructed adapters, for composition and
    /// tests that need custom retry policies
    pub fn from_adapters(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.kind(), adapter))
                .collect(),
        }
    }

    /// Resolve a model identifier to its registered adapter.
    ///
    /// Returns `None` when the prefix is unrecognized or the family's adapter
    /// was never registered.
    pub fn resolve(&self, model: &str) -> Option<Arc<dyn ProviderAdapter>> {
        let kind = ProviderKind::for_model(model)?;
        self.adapters.get(&kind).cloned()
    }

    /// Resolve with the full error taxonomy: unknown prefix vs missing
    /// registration are distinct failures
    fn resolve_strict(&self, model: &str) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        let kind = ProviderKind::for_model(model)
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))?;
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "provider {} is not registered (missing credential)",
                kind
            ))
        })
    }

    /// Perform a completion against whichever adapter serves the model
    pub async fn generate(
        &self,
        request: &CompletionRequest,
    ) -> ProviderResult<CompletionResponse> {
        let adapter = self.resolve_strict(&request.model)?;
        adapter.generate(request).await
    }

    /// Perform a streaming completion against whichever adapter serves the
    /// model; chunks go to `sink` in strict per-stream order
    pub async fn generate_stream(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        sink: ChunkSink<'_>,
    ) -> ProviderResult<CompletionResponse> {
        let adapter = self.resolve_strict(&request.model)?;
        adapter.generate_stream(request, stream_id, sink).await
    }

    /// Whether a provider family is registered and has a usable credential
    pub fn is_provider_available(&self, kind: ProviderKind) -> bool {
        self.adapters
            .get(&kind)
            .map(|adapter| adapter.is_available())
            .unwrap_or(false)
    }

    /// Provider families currently registered and available, in stable order
    pub fn list_available(&self) -> Vec<ProviderKind> {
        let mut available: Vec<ProviderKind> = self
            .adapters
            .iter()
            .filter(|(_, adapter)| adapter.is_available())
            .map(|(kind, _)| *kind)
            .collect();
        available.sort_by_key(|kind| kind.as_str());
        available
    }
}
