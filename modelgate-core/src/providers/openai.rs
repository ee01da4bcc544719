//! OpenAI provider adapter
//!
//! Translates the canonical protocol to OpenAI's chat completions API,
//! including native SSE streaming and native token accounting.

use crate::config::{ProviderSettings, SecretString};
use crate::pricing;
use crate::protocol::{
    CompletionRequest, CompletionResponse, MessageRole, ProviderKind, StreamChunk, Usage,
};
use crate::providers::adapter::{
    approximate_tokens, estimate_prompt_tokens, final_chunk_metadata, ChunkSink, ProviderAdapter,
};
use crate::providers::error::{is_rate_limit_text, ProviderError, ProviderResult};
use crate::providers::normalize::{message_text, request_messages};
use crate::providers::retry::{RetryExecutor, RetryPolicy};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Characters per token for OpenAI-family models
const TOKEN_DIVISOR: f64 = 4.0;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,

    content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,

    temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    id: String,
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,

    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for OpenAI's chat completions API
pub struct OpenAiAdapter {
    api_key: SecretString,
    base_url: String,
    client: Client,
    retry_policy: RetryPolicy,
}

impl OpenAiAdapter {
    /// Create a new OpenAI adapter from provider settings
    pub fn new(settings: &ProviderSettings) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            api_key: settings.api_key.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn to_wire_messages(&self, request: &CompletionRequest) -> ProviderResult<Vec<OpenAiMessage>> {
        let mut wire = Vec::new();

        // OpenAI takes the system prompt as a leading system-role message
        if let Some(system) = &request.system_prompt {
            wire.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
                tool_call_id: None,
            });
        }

        for message in request_messages(request)? {
            let role = match message.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };
            wire.push(OpenAiMessage {
                role: role.to_string(),
                content: message_text(&message),
                tool_call_id: message.tool_call_id.clone(),
            });
        }

        Ok(wire)
    }

    fn build_request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> ProviderResult<OpenAiRequest> {
        Ok(OpenAiRequest {
            model: request.model.clone(),
            messages: self.to_wire_messages(request)?,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: request.stop_sequences.clone(),
            stream: stream.then_some(true),
            stream_options: stream.then_some(OpenAiStreamOptions {
                include_usage: true,
            }),
        })
    }

    fn map_error_response(status: StatusCode, body: String) -> ProviderError {
        let message = serde_json::from_str::<OpenAiErrorBody>(&body)
            .map(|e| e.error.message.clone())
            .unwrap_or_else(|_| body.clone());
        let error_type = serde_json::from_str::<OpenAiErrorBody>(&body)
            .ok()
            .and_then(|e| e.error.error_type);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                provider: ProviderKind::OpenAI,
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: ProviderKind::OpenAI,
                message,
            },
            _ if error_type.as_deref() == Some("insufficient_quota")
                || is_rate_limit_text(&message) =>
            {
                ProviderError::RateLimited {
                    provider: ProviderKind::OpenAI,
                    message,
                }
            }
            _ => ProviderError::Api {
                provider: ProviderKind::OpenAI,
                message,
            },
        }
    }

    async fn post(&self, wire: &OpenAiRequest) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %wire.model, "openai request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(wire)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "openai request failed");
            return Err(Self::map_error_response(status, body));
        }

        Ok(response)
    }

    async fn try_generate(&self, wire: &OpenAiRequest) -> ProviderResult<OpenAiResponse> {
        let response = self.post(wire).await?;
        Ok(response.json::<OpenAiResponse>().await?)
    }

    fn build_usage(
        &self,
        request: &CompletionRequest,
        output: &str,
        native: Option<&OpenAiUsage>,
    ) -> ProviderResult<Usage> {
        // Native counts take precedence over the length approximation
        let (prompt_tokens, completion_tokens) = match native {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (
                estimate_prompt_tokens(request, |t| self.count_tokens(t))?,
                self.count_tokens(output),
            ),
        };

        Ok(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost: pricing::estimate_cost(&request.model, prompt_tokens, completion_tokens),
        })
    }

    fn build_response(
        &self,
        request: &CompletionRequest,
        wire: OpenAiResponse,
    ) -> ProviderResult<CompletionResponse> {
        let mut metadata = HashMap::new();
        metadata.insert("response_id".to_string(), serde_json::json!(wire.id));

        let (content, finish_reason) = wire
            .choices
            .into_iter()
            .next()
            .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
            .unwrap_or_default();
        if let Some(finish) = finish_reason {
            metadata.insert("finish_reason".to_string(), serde_json::json!(finish));
        }

        let usage = self.build_usage(request, &content, wire.usage.as_ref())?;

        Ok(CompletionResponse {
            model: request.model.clone(),
            provider: ProviderKind::OpenAI,
            content,
            usage,
            metadata,
        })
    }

    async fn stream_inner(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        sink: ChunkSink<'_>,
    ) -> ProviderResult<CompletionResponse> {
        let wire = self.build_request(request, true)?;
        let executor = RetryExecutor::new(self.retry_policy.clone(), ProviderKind::OpenAI);
        let response = executor.execute(|| self.post(&wire)).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut content = String::new();
        let mut native_usage: Option<OpenAiUsage> = None;
        let mut finish_reason: Option<String> = None;

        while let Some(event) = events.next().await {
            let event = event
                .map_err(|e| ProviderError::Stream(format!("openai stream error: {}", e)))?;
            if event.data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<OpenAiStreamChunk>(&event.data) {
                Ok(chunk) => {
                    if let Some(usage) = chunk.usage {
                        native_usage = Some(usage);
                    }
                    if let Some(choice) = chunk.choices.into_iter().next() {
                        if let Some(finish) = choice.finish_reason {
                            finish_reason = Some(finish);
                        }
                        if let Some(delta) = choice.delta.content {
                            if !delta.is_empty() {
                                content.push_str(&delta);
                                sink(StreamChunk::delta(stream_id, &request.model, delta));
                            }
                        }
                    }
                }
                Err(e) => {
                    // Malformed chunks are skipped, not fatal to the stream
                    warn!(error = %e, "failed to parse openai stream chunk");
                }
            }
        }

        let usage = self.build_usage(request, &content, native_usage.as_ref())?;
        let mut metadata = HashMap::new();
        if let Some(finish) = finish_reason {
            metadata.insert("finish_reason".to_string(), serde_json::json!(finish));
        }

        let completion = CompletionResponse {
            model: request.model.clone(),
            provider: ProviderKind::OpenAI,
            content,
            usage,
            metadata,
        };

        sink(StreamChunk::final_delta(
            stream_id,
            &request.model,
            final_chunk_metadata(&completion),
        ));

        Ok(completion)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn count_tokens(&self, text: &str) -> u32 {
        approximate_tokens(text, TOKEN_DIVISOR)
    }

    fn format_messages(&self, request: &CompletionRequest) -> ProviderResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_wire_messages(request)?)?)
    }

    async fn generate(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        info!(model = %request.model, "openai generate");

        let wire = self.build_request(request, false)?;
        let executor = RetryExecutor::new(self.retry_policy.clone(), ProviderKind::OpenAI);
        let response = executor.execute(|| self.try_generate(&wire)).await;

        match response {
            Ok(wire_response) => {
                let completion = self.build_response(request, wire_response)?;
                info!(
                    model = %request.model,
                    total_tokens = completion.usage.total_tokens,
                    "openai generate complete"
                );
                Ok(completion)
            }
            Err(err) => {
                error!(model = %request.model, error = %err, "openai generate failed");
                Err(err)
            }
        }
    }

    async fn generate_stream(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        sink: ChunkSink<'_>,
    ) -> ProviderResult<CompletionResponse> {
        info!(model = %request.model, stream_id = %stream_id, "openai stream");

        match self.stream_inner(request, stream_id, sink).await {
            Ok(completion) => Ok(completion),
            Err(err) => {
                error!(model = %request.model, error = %err, "openai stream failed");
                sink(StreamChunk::terminal_error(
                    stream_id,
                    &request.model,
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(&ProviderSettings::new("sk-test")).unwrap()
    }

    #[test]
    fn test_availability_tracks_credential() {
        assert!(adapter().is_available());
        let empty = OpenAiAdapter::new(&ProviderSettings::new("")).unwrap();
        assert!(!empty.is_available());
    }

    #[test]
    fn test_system_prompt_becomes_leading_system_message() {
        let request = CompletionRequest::from_prompt("gpt-4", "Hello")
            .with_system_prompt("Be terse");
        let wire = adapter().to_wire_messages(&request).unwrap();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content, "Be terse");
        assert_eq!(wire[1].role, "user");
    }

    #[test]
    fn test_tool_role_maps_natively() {
        let request = CompletionRequest::from_messages(
            "gpt-4",
            vec![
                Message::user("run it"),
                Message::tool("call-1", "ok"),
            ],
        );
        let wire = adapter().to_wire_messages(&request).unwrap();
        assert_eq!(wire[1].role, "tool");
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_count_tokens_divisor() {
        assert_eq!(adapter().count_tokens("abcdefgh"), 2);
        assert_eq!(adapter().count_tokens(""), 0);
    }

    #[test]
    fn test_error_mapping() {
        let err = OpenAiAdapter::map_error_response(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit exceeded", "type": "rate_limit_exceeded"}}"#
                .to_string(),
        );
        assert!(err.is_rate_limited());

        let err = OpenAiAdapter::map_error_response(
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"message": "bad key", "type": "invalid_api_key"}}"#.to_string(),
        );
        assert!(matches!(err, ProviderError::Authentication { .. }));

        let err =
            OpenAiAdapter::map_error_response(StatusCode::BAD_REQUEST, "not json".to_string());
        assert!(matches!(err, ProviderError::Api { ref message, .. } if message == "not json"));
    }
}
