//! Core protocol types for LLM interactions
//!
//! These are the provider-agnostic request, response, and streaming shapes.
//! Every adapter translates between this model and its backend's wire format.
//! The design prioritizes:
//! - Type safety through enums and strong typing
//! - Forward compatibility through optional fields and metadata
//! - Graceful degradation for content the library does not understand

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Provider family served by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Google,
}

impl ProviderKind {
    /// Stable lowercase identifier, used in logs and response metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    /// Classify a model identifier by its naming-prefix convention.
    ///
    /// Returns `None` when the prefix matches no known family. The mapping is
    /// deterministic and independent of which adapters are registered.
    pub fn for_model(model: &str) -> Option<ProviderKind> {
        if model.starts_with("gpt-")
            || model.starts_with("o1")
            || model.starts_with("o3")
            || model.starts_with("o4")
        {
            Some(ProviderKind::OpenAI)
        } else if model.starts_with("claude") {
            Some(ProviderKind::Anthropic)
        } else if model.starts_with("gemini") {
            Some(ProviderKind::Google)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions that guide the model's behavior
    System,
    /// User input message
    User,
    /// Assistant (model) response
    Assistant,
    /// Tool invocation result fed back to the model
    Tool,
}

/// A typed unit of message content
///
/// Unknown `type` tags deserialize into [`ContentBlock::Other`] rather than
/// failing, so content the library does not understand is carried through and
/// rendered as a placeholder instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },
    /// A code snippet, optionally tagged with its language
    Code {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// A tool invocation by the assistant
    ToolUse {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    /// The result of a tool invocation
    ToolResult { result: serde_json::Value },
    /// An image reference; only the caption is carried
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// Any block type this library does not recognize
    Other { kind: String },
}

impl ContentBlock {
    /// Shorthand for a text block
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| D::Error::custom("content block must be a JSON object"))?;

        let kind = obj.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
        let get_str = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        Ok(match kind {
            "text" => ContentBlock::Text {
                text: get_str("text").unwrap_or_default(),
            },
            "code" => ContentBlock::Code {
                code: get_str("code").unwrap_or_default(),
                language: get_str("language"),
            },
            "tool_use" => ContentBlock::ToolUse {
                tool_name: get_str("tool_name").unwrap_or_default(),
                input: obj.get("input").cloned(),
            },
            "tool_result" => ContentBlock::ToolResult {
                result: obj.get("result").cloned().unwrap_or(serde_json::Value::Null),
            },
            "image" => ContentBlock::Image {
                caption: get_str("caption"),
            },
            other => ContentBlock::Other {
                kind: other.to_string(),
            },
        })
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Tool call correlation ID (for tool-role messages, where the backend
    /// requires one)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a message with a single text block
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }

    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    /// Create a tool response message
    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::Tool, text);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create a message from pre-built content blocks
    pub fn with_blocks(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
        }
    }
}

/// The prompt carried by a request: a bare string or a message list, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    /// A single prompt string, treated as one user message
    Text(String),
    /// An ordered conversation; must be non-empty
    Messages(Vec<Message>),
}

fn default_temperature() -> f32 {
    0.7
}

/// Provider-agnostic completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier; its prefix determines the provider family
    pub model: String,

    /// Prompt string or message list
    pub input: PromptInput,

    /// System prompt, routed to each provider's native mechanism
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Caller-supplied correlation ID; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CompletionRequest {
    /// Create a request from a single prompt string
    pub fn from_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: PromptInput::Text(prompt.into()),
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: None,
            stop_sequences: None,
            request_id: None,
        }
    }

    /// Create a request from an ordered message list
    pub fn from_messages(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            input: PromptInput::Messages(messages),
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: None,
            stop_sequences: None,
            request_id: None,
        }
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum tokens to generate
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a stop sequence
    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences
            .get_or_insert_with(Vec::new)
            .push(stop.into());
        self
    }

    /// Set the request correlation ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Token usage and estimated cost for one completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,

    /// Estimated monetary cost in USD
    pub estimated_cost: f64,
}

/// Normalized completion response, identical in shape across providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Model that produced the completion
    pub model: String,

    /// Provider family that served the request
    pub provider: ProviderKind,

    /// Generated text
    pub content: String,

    /// Token accounting, native where the backend reports it
    pub usage: Usage,

    /// Provider-specific extras (finish reason, response id, ...)
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Kind of a streamed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Incremental output text
    ContentDelta,
    /// Terminal failure; always the last chunk of its stream
    Error,
}

/// One incremental unit of a streamed completion
///
/// Exactly one chunk per stream carries `is_final = true`, and it is the last
/// chunk emitted. Chunks within a stream arrive in strict order; chunks from
/// different streams have no ordering relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Stream this chunk belongs to
    pub stream_id: String,

    /// Unique, caller-opaque chunk identifier
    pub chunk_id: String,

    /// Chunk kind
    pub kind: ChunkKind,

    /// Output text (content deltas)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Failure description (error chunks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Emission timestamp, milliseconds since the Unix epoch
    pub timestamp_ms: u64,

    /// Whether this is the terminal chunk of the stream
    pub is_final: bool,

    /// Model producing the stream
    pub model: String,

    /// Extras; the terminal chunk carries final usage here
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StreamChunk {
    /// Create a non-final content delta
    pub fn delta(stream_id: &str, model: &str, text: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            chunk_id: uuid::Uuid::new_v4().to_string(),
            kind: ChunkKind::ContentDelta,
            text: Some(text.into()),
            error: None,
            timestamp_ms: now_millis(),
            is_final: false,
            model: model.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Create the terminal content delta, carrying usage in its metadata
    pub fn final_delta(
        stream_id: &str,
        model: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            chunk_id: uuid::Uuid::new_v4().to_string(),
            kind: ChunkKind::ContentDelta,
            text: Some(String::new()),
            error: None,
            timestamp_ms: now_millis(),
            is_final: true,
            model: model.to_string(),
            metadata,
        }
    }

    /// Create a terminal error chunk
    pub fn terminal_error(stream_id: &str, model: &str, error: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            chunk_id: uuid::Uuid::new_v4().to_string(),
            kind: ChunkKind::Error,
            text: None,
            error: Some(error.into()),
            timestamp_ms: now_millis(),
            is_final: true,
            model: model.to_string(),
            metadata: HashMap::new(),
        }
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_prefix_classification() {
        assert_eq!(ProviderKind::for_model("gpt-4"), Some(ProviderKind::OpenAI));
        assert_eq!(ProviderKind::for_model("o1-mini"), Some(ProviderKind::OpenAI));
        assert_eq!(
            ProviderKind::for_model("claude-3-haiku"),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            ProviderKind::for_model("gemini-pro"),
            Some(ProviderKind::Google)
        );
        assert_eq!(ProviderKind::for_model("unknown-model-x"), None);
    }

    #[test]
    fn test_unknown_content_block_deserializes_to_other() {
        let json = r#"{"type": "video", "url": "https://example.com/clip"}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        assert_eq!(
            block,
            ContentBlock::Other {
                kind: "video".to_string()
            }
        );
    }

    #[test]
    fn test_content_block_round_trip() {
        let block = ContentBlock::Code {
            code: "fn main() {}".to_string(),
            language: Some("rust".to_string()),
        };
        let json = serde_json::to_string(&block).unwrap();
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_missing_type_tag_degrades() {
        let json = r#"{"text": "orphan"}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        assert!(matches!(block, ContentBlock::Other { ref kind } if kind == "unknown"));
    }

    #[test]
    fn test_request_builder_defaults() {
        let request = CompletionRequest::from_prompt("gpt-4", "Hello")
            .with_max_tokens(256)
            .with_stop_sequence("END");
        assert!((request.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(
            request.stop_sequences.as_deref(),
            Some(&["END".to_string()][..])
        );
        assert!(request.request_id.is_none());
    }

    #[test]
    fn test_stream_chunk_constructors() {
        let delta = StreamChunk::delta("s1", "gpt-4", "hi");
        assert_eq!(delta.kind, ChunkKind::ContentDelta);
        assert!(!delta.is_final);

        let err = StreamChunk::terminal_error("s1", "gpt-4", "boom");
        assert_eq!(err.kind, ChunkKind::Error);
        assert!(err.is_final);
        assert_eq!(err.error.as_deref(), Some("boom"));
        assert_ne!(delta.chunk_id, err.chunk_id);
    }
}
