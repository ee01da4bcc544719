//! Google Gemini provider adapter
//!
//! Translates the canonical protocol to the Gemini generateContent API. The
//! backend has no incremental output in this integration, so streaming uses
//! the shared simulated fallback: one full generate, re-chunked with a small
//! delay between pieces.

use crate::config::{ProviderSettings, SecretString};
use crate::pricing;
use crate::protocol::{
    CompletionRequest, CompletionResponse, MessageRole, ProviderKind, StreamChunk, Usage,
};
use crate::providers::adapter::{
    approximate_tokens, estimate_prompt_tokens, simulate_stream, ChunkSink, ProviderAdapter,
};
use crate::providers::error::{is_rate_limit_text, ProviderError, ProviderResult};
use crate::providers::normalize::{message_text, request_messages};
use crate::providers::retry::{RetryExecutor, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Characters per token for Gemini-family models
const TOKEN_DIVISOR: f64 = 4.0;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,

    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,

    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    status: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for Google's Gemini generateContent API
pub struct GoogleAdapter {
    api_key: SecretString,
    base_url: String,
    client: Client,
    retry_policy: RetryPolicy,
}

impl GoogleAdapter {
    /// Create a new Gemini adapter from provider settings
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

    /// Split the conversation into the native system instruction and the
    /// user/model content turns.
    fn to_wire_parts(
        &self,
        request: &CompletionRequest,
    ) -> ProviderResult<(Option<GeminiSystemInstruction>, Vec<GeminiContent>)> {
        let mut system_parts: Vec<GeminiPart> = Vec::new();
        if let Some(system) = &request.system_prompt {
            system_parts.push(GeminiPart {
                text: system.clone(),
            });
        }

        let mut contents = Vec::new();
        for message in request_messages(request)? {
            let text = message_text(&message);
            match message.role {
                // System messages route to the native systemInstruction field
                MessageRole::System => system_parts.push(GeminiPart { text }),
                MessageRole::Assistant => contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart { text }],
                }),
                // Gemini has no tool role here; fold into a user turn
                MessageRole::User | MessageRole::Tool => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart { text }],
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: system_parts,
            })
        };
        Ok((system, contents))
    }

    fn build_request(&self, request: &CompletionRequest) -> ProviderResult<GeminiRequest> {
        let (system_instruction, contents) = self.to_wire_parts(request)?;
        Ok(GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                stop_sequences: request.stop_sequences.clone(),
            },
        })
    }

    fn map_error_response(status: StatusCode, body: String) -> ProviderError {
        let detail = serde_json::from_str::<GeminiErrorBody>(&body).ok();
        let message = detail
            .as_ref()
            .map(|d| d.error.message.clone())
            .unwrap_or_else(|| body.clone());
        let grpc_status = detail.and_then(|d| d.error.status);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                provider: ProviderKind::Google,
                message,
            },
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: ProviderKind::Google,
                message,
            },
            _ if grpc_status.as_deref() == Some("RESOURCE_EXHAUSTED")
                || is_rate_limit_text(&message) =>
            {
                ProviderError::RateLimited {
                    provider: ProviderKind::Google,
                    message,
                }
            }
            _ => ProviderError::Api {
                provider: ProviderKind::Google,
                message,
            },
        }
    }

    async fn try_generate(
        &self,
        model: &str,
        wire: &GeminiRequest,
    ) -> ProviderResult<GeminiResponse> {
        // Gemini authenticates with the key as a query parameter
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            model,
            self.api_key.expose_secret()
        );
        debug!(model = %model, "gemini request");

        let response = self.client.post(&url).json(wire).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "gemini request failed");
            return Err(Self::map_error_response(status, body));
        }

        Ok(response.json::<GeminiResponse>().await?)
    }

    fn build_usage(
        &self,
        request: &CompletionRequest,
        output: &str,
        native: Option<&GeminiUsageMetadata>,
    ) -> ProviderResult<Usage> {
        let native_counts = native.and_then(|u| {
            match (u.prompt_token_count, u.candidates_token_count) {
                (Some(prompt), Some(completion)) => Some((prompt, completion)),
                _ => None,
            }
        });

        let (prompt_tokens, completion_tokens) = match native_counts {
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
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn count_tokens(&self, text: &str) -> u32 {
        approximate_tokens(text, TOKEN_DIVISOR)
    }

    fn format_messages(&self, request: &CompletionRequest) -> ProviderResult<serde_json::Value> {
        let (system_instruction, contents) = self.to_wire_parts(request)?;
        Ok(serde_json::json!({
            "systemInstruction": system_instruction,
            "contents": contents,
        }))
    }

    async fn generate(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        info!(model = %request.model, "gemini generate");

        let wire = self.build_request(request)?;
        let executor = RetryExecutor::new(self.retry_policy.clone(), ProviderKind::Google);
        let result = executor
            .execute(|| self.try_generate(&request.model, &wire))
            .await;

        match result {
            Ok(wire_response) => {
                let candidate = wire_response.candidates.into_iter().next();
                let (content, finish_reason) = match candidate {
                    Some(candidate) => {
                        let text: String = candidate
                            .content
                            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
                            .unwrap_or_default();
                        (text, candidate.finish_reason)
                    }
                    None => (String::new(), None),
                };

                let usage =
                    self.build_usage(request, &content, wire_response.usage_metadata.as_ref())?;

                let mut metadata = HashMap::new();
                if let Some(finish) = finish_reason {
                    metadata.insert("finish_reason".to_string(), serde_json::json!(finish));
                }

                info!(
                    model = %request.model,
                    total_tokens = usage.total_tokens,
                    "gemini generate complete"
                );

                Ok(CompletionResponse {
                    model: request.model.clone(),
                    provider: ProviderKind::Google,
                    content,
                    usage,
                    metadata,
                })
            }
            Err(err) => {
                error!(model = %request.model, error = %err, "gemini generate failed");
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
        info!(model = %request.model, stream_id = %stream_id, "gemini stream (simulated)");

        // No native incremental output; generate once and re-chunk
        match self.generate(request).await {
            Ok(completion) => Ok(simulate_stream(completion, stream_id, sink).await),
            Err(err) => {
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
