//! Gateway configuration
//!
//! Credentials and base URLs are read once, at registry construction. A
//! missing credential is a recoverable condition: the provider is simply
//! not registered.

pub mod secrets;

pub use secrets::SecretString;

use serde::{Deserialize, Serialize};
use std::env;

/// Settings for one provider family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// API key; an empty key makes the adapter report itself unavailable
    pub api_key: SecretString,

    /// Base URL override, mainly for tests and proxies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Create settings with just an API key
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Override the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Top-level configuration consumed by [`crate::providers::ProviderRegistry`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// OpenAI family settings, absent when no credential is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderSettings>,

    /// Anthropic family settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderSettings>,

    /// Google (Gemini) family settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderSettings>,
}

impl GatewayConfig {
    /// Build a configuration from the process environment.
    ///
    /// Reads `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, and `GEMINI_API_KEY`, plus
    /// optional `OPENAI_BASE_URL` / `ANTHROPIC_BASE_URL` / `GEMINI_BASE_URL`
    /// overrides. Absent variables leave the provider unconfigured.
    pub fn from_env() -> Self {
        Self {
            openai: settings_from_env("OPENAI_API_KEY", "OPENAI_BASE_URL"),
            anthropic: settings_from_env("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
            google: settings_from_env("GEMINI_API_KEY", "GEMINI_BASE_URL"),
        }
    }

    /// Set OpenAI settings
    pub fn with_openai(mut self, settings: ProviderSettings) -> Self {
        self.openai = Some(settings);
        self
    }

    /// Set Anthropic settings
    pub fn with_anthropic(mut self, settings: ProviderSettings) -> Self {
        self.anthropic = Some(settings);
        self
    }

    /// Set Google settings
    pub fn with_google(mut self, settings: ProviderSettings) -> Self {
        self.google = Some(settings);
        self
    }
}

fn settings_from_env(key_var: &str, url_var: &str) -> Option<ProviderSettings> {
    let api_key = env::var(key_var).ok()?;
    let mut settings = ProviderSettings::new(api_key);
    if let Ok(base_url) = env::var(url_var) {
        settings = settings.with_base_url(base_url);
    }
    Some(settings)
}
