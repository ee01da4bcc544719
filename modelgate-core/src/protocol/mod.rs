//! Protocol types shared by all providers

pub mod types;

pub use types::{
    ChunkKind, CompletionRequest, CompletionResponse, ContentBlock, Message, MessageRole,
    PromptInput, ProviderKind, StreamChunk, Usage,
};
