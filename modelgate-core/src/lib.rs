//! Modelgate core library
//!
//! A uniform completion and streaming layer over heterogeneous LLM providers.
//! Callers build a [`ProviderRegistry`] from configuration once; requests
//! route to per-backend adapters by model-name prefix, and every adapter
//! speaks the same request/response/streaming contract.

pub mod config;
pub mod pricing;
pub mod protocol;
pub mod providers;

pub use config::{GatewayConfig, ProviderSettings, SecretString};
pub use protocol::{
    ChunkKind, CompletionRequest, CompletionResponse, ContentBlock, Message, MessageRole,
    PromptInput, ProviderKind, StreamChunk, Usage,
};
pub use providers::{
    ChunkSink, ProviderAdapter, ProviderError, ProviderRegistry, ProviderResult, RetryPolicy,
};

/// Returns the version of the modelgate core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
