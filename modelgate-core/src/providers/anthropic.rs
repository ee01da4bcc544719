//! Anthropic provider adapter
//!
//! Translates the canonical protocol to Anthropic's messages API. Anthropic
//! takes the system prompt as a dedicated top-level field and only accepts
//! user/assistant roles in the message list, so system messages are merged
//! into that field and tool messages fold into user messages (a deliberate
//! lossy fallback).

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// The messages API requires max_tokens; used when the caller sets none
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Characters per token for Claude-family models
const TOKEN_DIVISOR: f64 = 4.5;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,

    temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,

    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// One SSE event; every field optional so all event types parse totally
#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,

    delta: Option<AnthropicStreamDelta>,
    usage: Option<AnthropicUsageDelta>,
    message: Option<AnthropicStreamMessage>,
    error: Option<AnthropicErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamDelta {
    text: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsageDelta {
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,

    message: String,
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for Anthropic's messages API
pub struct AnthropicAdapter {
    api_key: SecretString,
    base_url: String,
    client: Client,
    retry_policy: RetryPolicy,
}

impl AnthropicAdapter {
    /// Create a new Anthropic adapter from provider settings
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

    /// Split the conversation into the native system field and the
    /// user/assistant message list.
    fn to_wire_parts(
        &self,
        request: &CompletionRequest,
    ) -> ProviderResult<(Option<String>, Vec<AnthropicMessage>)> {
        let mut system_parts: Vec<String> = Vec::new();
        if let Some(system) = &request.system_prompt {
            system_parts.push(system.clone());
        }

        let mut wire = Vec::new();
        for message in request_messages(request)? {
            let text = message_text(&message);
            match message.role {
                // System messages merge into the dedicated system field,
                // never dropped
                MessageRole::System => system_parts.push(text),
                MessageRole::User => wire.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: text,
                }),
                MessageRole::Assistant => wire.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: text,
                }),
                // No native tool role; fold into a user message
                MessageRole::Tool => wire.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: text,
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        Ok((system, wire))
    }

    fn build_request(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> ProviderResult<AnthropicRequest> {
        let (system, messages) = self.to_wire_parts(request)?;
        Ok(AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
            stream: stream.then_some(true),
        })
    }

    fn map_error_response(status: StatusCode, body: String) -> ProviderError {
        let detail = serde_json::from_str::<AnthropicErrorBody>(&body).ok();
        let message = detail
            .as_ref()
            .map(|d| d.error.message.clone())
            .unwrap_or_else(|| body.clone());
        let error_type = detail.and_then(|d| d.error.error_type);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                provider: ProviderKind::Anthropic,
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: ProviderKind::Anthropic,
                message,
            },
            _ if error_type.as_deref() == Some("overloaded_error")
                || is_rate_limit_text(&message) =>
            {
                ProviderError::RateLimited {
                    provider: ProviderKind::Anthropic,
                    message,
                }
            }
            _ => ProviderError::Api {
                provider: ProviderKind::Anthropic,
                message,
            },
        }
    }

    async fn post(&self, wire: &AnthropicRequest) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        debug!(url = %url, model = %wire.model, "anthropic request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(wire)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "anthropic request failed");
            return Err(Self::map_error_response(status, body));
        }

        Ok(response)
    }

    async fn try_generate(&self, wire: &AnthropicRequest) -> ProviderResult<AnthropicResponse> {
        let response = self.post(wire).await?;
        Ok(response.json::<AnthropicResponse>().await?)
    }

    fn build_usage(
        &self,
        request: &CompletionRequest,
        output: &str,
        native: Option<(u32, u32)>,
    ) -> ProviderResult<Usage> {
        let (prompt_tokens, completion_tokens) = match native {
            Some(counts) => counts,
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

    async fn stream_inner(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        sink: ChunkSink<'_>,
    ) -> ProviderResult<CompletionResponse> {
        let wire = self.build_request(request, true)?;
        let executor = RetryExecutor::new(self.retry_policy.clone(), ProviderKind::Anthropic);
        let response = executor.execute(|| self.post(&wire)).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut content = String::new();
        let mut input_tokens: Option<u32> = None;
        let mut output_tokens: Option<u32> = None;
        let mut stop_reason: Option<String> = None;

        while let Some(event) = events.next().await {
            let event = event
                .map_err(|e| ProviderError::Stream(format!("anthropic stream error: {}", e)))?;

            let parsed = match serde_json::from_str::<AnthropicStreamEvent>(&event.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "failed to parse anthropic stream event");
                    continue;
                }
            };

            match parsed.event_type.as_str() {
                "message_start" => {
                    if let Some(usage) = parsed.message.and_then(|m| m.usage) {
                        input_tokens = Some(usage.input_tokens);
                    }
                }
                "content_block_delta" => {
                    if let Some(text) = parsed.delta.and_then(|d| d.text) {
                        if !text.is_empty() {
                            content.push_str(&text);
                            sink(StreamChunk::delta(stream_id, &request.model, text));
                        }
                    }
                }
                "message_delta" => {
                    if let Some(delta) = parsed.delta {
                        if delta.stop_reason.is_some() {
                            stop_reason = delta.stop_reason;
                        }
                    }
                    if let Some(tokens) = parsed.usage.and_then(|u| u.output_tokens) {
                        output_tokens = Some(tokens);
                    }
                }
                "message_stop" => break,
                "error" => {
                    let message = parsed
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown stream error".to_string());
                    return Err(ProviderError::Api {
                        provider: ProviderKind::Anthropic,
                        message,
                    });
                }
                // ping, content_block_start, content_block_stop
                _ => {}
            }
        }

        let native = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some((input, output)),
            _ => None,
        };
        let usage = self.build_usage(request, &content, native)?;

        let mut metadata = HashMap::new();
        if let Some(stop) = stop_reason {
            metadata.insert("finish_reason".to_string(), serde_json::json!(stop));
        }

        let completion = CompletionResponse {
            model: request.model.clone(),
            provider: ProviderKind::Anthropic,
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
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn count_tokens(&self, text: &str) -> u32 {
        approximate_tokens(text, TOKEN_DIVISOR)
    }

    fn format_messages(&self, request: &CompletionRequest) -> ProviderResult<serde_json::Value> {
        let (system, messages) = self.to_wire_parts(request)?;
        Ok(serde_json::json!({
            "system": system,
            "messages": messages,
        }))
    }

    async fn generate(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        info!(model = %request.model, "anthropic generate");

        let wire = self.build_request(request, false)?;
        let executor = RetryExecutor::new(self.retry_policy.clone(), ProviderKind::Anthropic);
        let result = executor.execute(|| self.try_generate(&wire)).await;

        match result {
            Ok(wire_response) => {
                let content: String = wire_response
                    .content
                    .iter()
                    .filter(|block| block.block_type == "text")
                    .filter_map(|block| block.text.as_deref())
                    .collect();

                let native = wire_response
                    .usage
                    .as_ref()
                    .map(|u| (u.input_tokens, u.output_tokens));
                let usage = self.build_usage(request, &content, native)?;

                let mut metadata = HashMap::new();
                metadata.insert(
                    "response_id".to_string(),
                    serde_json::json!(wire_response.id),
                );
                if let Some(stop) = wire_response.stop_reason {
                    metadata.insert("finish_reason".to_string(), serde_json::json!(stop));
                }

                info!(
                    model = %request.model,
                    total_tokens = usage.total_tokens,
                    "anthropic generate complete"
                );

                Ok(CompletionResponse {
                    model: request.model.clone(),
                    provider: ProviderKind::Anthropic,
                    content,
                    usage,
                    metadata,
                })
            }
            Err(err) => {
                error!(model = %request.model, error = %err, "anthropic generate failed");
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
        info!(model = %request.model, stream_id = %stream_id, "anthropic stream");

        match self.stream_inner(request, stream_id, sink).await {
            Ok(completion) => Ok(completion),
            Err(err) => {
                error!(model = %request.model, error = %err, "anthropic stream failed");
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

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(&ProviderSettings::new("sk-ant-test")).unwrap()
    }

    #[test]
    fn test_system_messages_merge_into_system_field() {
        let request = CompletionRequest::from_messages(
            "claude-3-haiku",
            vec![Message::system("rule one"), Message::user("hello")],
        )
        .with_system_prompt("rule zero");

        let (system, messages) = adapter().to_wire_parts(&request).unwrap();
        assert_eq!(system.as_deref(), Some("rule zero\n\nrule one"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_tool_role_folds_into_user() {
        let request = CompletionRequest::from_messages(
            "claude-3-haiku",
            vec![Message::user("run it"), Message::tool("call-1", "done")],
        );
        let (_, messages) = adapter().to_wire_parts(&request).unwrap();
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "done");
    }

    #[test]
    fn test_max_tokens_defaulted_for_wire() {
        let request = CompletionRequest::from_prompt("claude-3-haiku", "hi");
        let wire = adapter().build_request(&request, false).unwrap();
        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);

        let wire = adapter()
            .build_request(&request.clone().with_max_tokens(64), false)
            .unwrap();
        assert_eq!(wire.max_tokens, 64);
    }

    #[test]
    fn test_count_tokens_divisor() {
        // 9 chars / 4.5 = 2
        assert_eq!(adapter().count_tokens("abcdefghi"), 2);
    }

    #[test]
    fn test_overloaded_maps_to_rate_limited() {
        let err = AnthropicAdapter::map_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error": {"type": "overloaded_error", "message": "Overloaded"}}"#.to_string(),
        );
        assert!(err.is_rate_limited());
    }
}
