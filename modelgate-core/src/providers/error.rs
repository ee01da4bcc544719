//! Provider error types and classification
//!
//! The taxonomy distinguishes transient rate/quota failures (retried with
//! backoff) from permanent backend failures (surfaced immediately, wrapped
//! with provider context).

use crate::protocol::ProviderKind;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when interacting with LLM providers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate or quota limit hit; transient, retried with backoff
    #[error("{provider} rate limit: {message}")]
    RateLimited {
        provider: ProviderKind,
        message: String,
    },

    /// Backend returned an error; carries the raw error text
    #[error("{provider} API error: {message}")]
    Api {
        provider: ProviderKind,
        message: String,
    },

    /// Authentication failed
    #[error("{provider} authentication failed: {message}")]
    Authentication {
        provider: ProviderKind,
        message: String,
    },

    /// Network or connection error
    #[error("network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Response could not be parsed
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Retry budget exhausted on a transient failure
    #[error("{provider} maximum retry limit reached after {attempts} attempts")]
    RetryLimitReached {
        provider: ProviderKind,
        attempts: u32,
    },

    /// Request violates a protocol invariant before any backend call
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Model id matches no known provider naming convention
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Provider recognized but never registered (missing credential)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure inside an active stream
    #[error("stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether this failure is a rate/quota/limit condition worth retrying.
    ///
    /// Besides the dedicated variant, backend error text is inspected because
    /// some providers report limit conditions through generic error payloads.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Api { message, .. } => is_rate_limit_text(message),
            _ => false,
        }
    }
}

/// Textual rate/quota/limit classification shared by all adapters
pub(crate) fn is_rate_limit_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("resource_exhausted")
        || lower.contains("overloaded")
        || lower.contains("429")
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(30)
        } else if err.is_connect() {
            ProviderError::Network(format!("connection failed: {}", err))
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_variant_is_transient() {
        let err = ProviderError::RateLimited {
            provider: ProviderKind::OpenAI,
            message: "slow down".to_string(),
        };
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_api_error_text_classification() {
        let transient = ProviderError::Api {
            provider: ProviderKind::Anthropic,
            message: "You have exceeded your quota for this month".to_string(),
        };
        assert!(transient.is_rate_limited());

        let permanent = ProviderError::Api {
            provider: ProviderKind::Anthropic,
            message: "invalid message ordering".to_string(),
        };
        assert!(!permanent.is_rate_limited());
    }

    #[test]
    fn test_non_api_errors_are_not_retried() {
        assert!(!ProviderError::Timeout(30).is_rate_limited());
        assert!(!ProviderError::Network("refused".to_string()).is_rate_limited());
        assert!(!ProviderError::Authentication {
            provider: ProviderKind::OpenAI,
            message: "bad key".to_string(),
        }
        .is_rate_limited());
    }

    #[test]
    fn test_retry_limit_error_message() {
        let err = ProviderError::RetryLimitReached {
            provider: ProviderKind::Google,
            attempts: 4,
        };
        assert!(err.to_string().contains("maximum retry limit reached"));
    }
}
