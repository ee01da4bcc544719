//! Provider adapter contract and shared helpers
//!
//! Every backend implements the same capability set: generate, streaming
//! generate, native message formatting, token estimation, and availability.
//! Adapters hold only an immutable credential, an HTTP client, and a retry
//! policy, so they are safe for unlimited concurrent invocation.

use crate::protocol::{CompletionRequest, CompletionResponse, ProviderKind, StreamChunk};
use crate::providers::error::ProviderResult;
use crate::providers::normalize::{message_text, request_messages};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Caller-supplied sink receiving stream chunks in strict emission order
pub type ChunkSink<'a> = &'a (dyn Fn(StreamChunk) + Send + Sync);

/// Characters per synthetic chunk when a backend lacks incremental output
pub const SIMULATED_CHUNK_CHARS: usize = 64;

/// Delay between synthetic chunks, preserving caller-observable streaming
pub const SIMULATED_CHUNK_DELAY: Duration = Duration::from_millis(25);

/// Uniform completion contract implemented per backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider family this adapter serves
    fn kind(&self) -> ProviderKind;

    /// Provider name, used in logs and error context
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// True iff a non-empty credential was supplied at construction.
    /// Never fails; adapters doing live checks must not block indefinitely.
    fn is_available(&self) -> bool;

    /// Length-based token approximation with a provider-tuned divisor.
    /// Total: never fails, returns 0 for empty text.
    fn count_tokens(&self, text: &str) -> u32;

    /// Shape the request's messages into this backend's native message array,
    /// for inspection and debugging
    fn format_messages(&self, request: &CompletionRequest) -> ProviderResult<serde_json::Value>;

    /// Perform one completion, retrying transient rate-limit failures
    async fn generate(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Perform one streaming completion.
    ///
    /// Emits CONTENT_DELTA chunks as text arrives and terminates with exactly
    /// one `is_final` chunk carrying usage in its metadata. On failure, one
    /// terminal ERROR chunk is emitted and the returned future resolves to
    /// `Err` — the two signals always agree. The returned response's `content`
    /// equals the in-order concatenation of the emitted deltas.
    async fn generate_stream(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        sink: ChunkSink<'_>,
    ) -> ProviderResult<CompletionResponse>;
}

/// Length-based token approximation: ceil(chars / divisor)
pub(crate) fn approximate_tokens(text: &str, divisor: f64) -> u32 {
    if text.is_empty() || divisor <= 0.0 {
        return 0;
    }
    (text.chars().count() as f64 / divisor).ceil() as u32
}

/// Sum the token estimate over every input message plus the system prompt
pub(crate) fn estimate_prompt_tokens<F>(request: &CompletionRequest, count: F) -> ProviderResult<u32>
where
    F: Fn(&str) -> u32,
{
    let messages = request_messages(request)?;
    let mut total: u32 = messages.iter().map(|m| count(&message_text(m))).sum();
    if let Some(system) = &request.system_prompt {
        total += count(system);
    }
    Ok(total)
}

/// Metadata map for a terminal stream chunk: final usage plus finish reason
pub(crate) fn final_chunk_metadata(
    response: &CompletionResponse,
) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    if let Ok(usage) = serde_json::to_value(&response.usage) {
        metadata.insert("usage".to_string(), usage);
    }
    if let Some(finish) = response.metadata.get("finish_reason") {
        metadata.insert("finish_reason".to_string(), finish.clone());
    }
    metadata
}

/// Streaming fallback for backends without native incremental output.
///
/// Re-chunks an already-complete response into fixed-size pieces with a small
/// delay between them, then emits the terminal usage chunk. This replicates
/// simulated streaming as a legitimate default, not an error path.
pub(crate) async fn simulate_stream(
    response: CompletionResponse,
    stream_id: &str,
    sink: ChunkSink<'_>,
) -> CompletionResponse {
    let chars: Vec<char> = response.content.chars().collect();
    for (i, piece) in chars.chunks(SIMULATED_CHUNK_CHARS).enumerate() {
        if i > 0 {
            tokio::time::sleep(SIMULATED_CHUNK_DELAY).await;
        }
        let text: String = piece.iter().collect();
        sink(StreamChunk::delta(stream_id, &response.model, text));
    }
    sink(StreamChunk::final_delta(
        stream_id,
        &response.model,
        final_chunk_metadata(&response),
    ));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Usage;
    use std::sync::Mutex;

    #[test]
    fn test_approximate_tokens() {
        assert_eq!(approximate_tokens("", 4.0), 0);
        assert_eq!(approximate_tokens("abcd", 4.0), 1);
        assert_eq!(approximate_tokens("abcde", 4.0), 2);
        assert_eq!(approximate_tokens("abcdefghi", 4.5), 2);
    }

    #[test]
    fn test_estimate_prompt_tokens_includes_system() {
        let request = CompletionRequest::from_prompt("gpt-4", "12345678")
            .with_system_prompt("1234");
        let total = estimate_prompt_tokens(&request, |t| approximate_tokens(t, 4.0)).unwrap();
        assert_eq!(total, 3); // 2 for prompt + 1 for system
    }

    #[tokio::test]
    async fn test_simulate_stream_invariants() {
        let content = "x".repeat(SIMULATED_CHUNK_CHARS * 2 + 10);
        let response = CompletionResponse {
            model: "gemini-pro".to_string(),
            provider: ProviderKind::Google,
            content: content.clone(),
            usage: Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
                estimated_cost: 0.0,
            },
            metadata: HashMap::new(),
        };

        let chunks: Mutex<Vec<StreamChunk>> = Mutex::new(Vec::new());
        let sink = |chunk: StreamChunk| chunks.lock().unwrap().push(chunk);
        let returned = simulate_stream(response, "s1", &sink).await;

        let chunks = chunks.into_inner().unwrap();
        assert_eq!(chunks.len(), 4); // 3 deltas + terminal
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
        assert!(chunks.last().unwrap().is_final);

        let concatenated: String = chunks
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect();
        assert_eq!(concatenated, content);
        assert_eq!(returned.content, content);
        assert!(chunks.last().unwrap().metadata.contains_key("usage"));
    }
}
