//! Provider abstraction layer
//!
//! One uniform request/response/streaming contract over heterogeneous LLM
//! backends, each with its own message schema, streaming protocol, token
//! accounting, and failure modes.

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod google;
pub mod normalize;
pub mod openai;
pub mod registry;
pub mod retry;

pub use adapter::{ChunkSink, ProviderAdapter};
pub use error::{ProviderError, ProviderResult};
pub use registry::ProviderRegistry;
pub use retry::{RetryExecutor, RetryPolicy};

// Re-export concrete adapters
pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;
