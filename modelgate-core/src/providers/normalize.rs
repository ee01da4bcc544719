//! Message normalization shared by every adapter
//!
//! [`blocks_to_text`] is the single point of truth for what text is actually
//! sent to a backend: all adapters render content blocks through it before
//! shaping their native message arrays.

use crate::protocol::{CompletionRequest, ContentBlock, Message, PromptInput};
use crate::providers::error::{ProviderError, ProviderResult};

/// Render an ordered block sequence into one display string.
///
/// Total and deterministic: unknown or partially-formed content degrades to a
/// bracketed placeholder, never an error and never silent omission.
pub fn blocks_to_text(blocks: &[ContentBlock]) -> String {
    let mut rendered = Vec::with_capacity(blocks.len());

    for block in blocks {
        match block {
            ContentBlock::Text { text } => rendered.push(text.clone()),
            ContentBlock::Code { code, language } => {
                let lang = language.as_deref().unwrap_or("");
                rendered.push(format!("```{}\n{}\n```", lang, code));
            }
            ContentBlock::ToolUse { tool_name, .. } => {
                rendered.push(format!("[Tool use: {}]", tool_name));
            }
            ContentBlock::ToolResult { result } => {
                let json = serde_json::to_string(result)
                    .unwrap_or_else(|_| "null".to_string());
                rendered.push(format!("[Tool result: {}]", json));
            }
            ContentBlock::Image { caption } => {
                rendered.push(format!("[Image: {}]", caption.as_deref().unwrap_or("")));
            }
            ContentBlock::Other { kind } => {
                rendered.push(format!("[{} content]", kind));
            }
        }
    }

    rendered.join("\n")
}

/// Render a whole message's content
pub fn message_text(message: &Message) -> String {
    blocks_to_text(&message.content)
}

/// Expand a request's input into an ordered message list.
///
/// A prompt string becomes a single user message. An empty message list
/// violates the request invariant and is rejected before any backend call.
pub fn request_messages(request: &CompletionRequest) -> ProviderResult<Vec<Message>> {
    match &request.input {
        PromptInput::Text(prompt) => Ok(vec![Message::user(prompt.clone())]),
        PromptInput::Messages(messages) => {
            if messages.is_empty() {
                return Err(ProviderError::InvalidRequest(
                    "message list must be non-empty".to_string(),
                ));
            }
            Ok(messages.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageRole;
    use serde_json::json;

    #[test]
    fn test_blocks_to_text_all_variants() {
        let blocks = vec![
            ContentBlock::text("hello"),
            ContentBlock::Code {
                code: "let x = 1;".to_string(),
                language: Some("rust".to_string()),
            },
            ContentBlock::ToolUse {
                tool_name: "search".to_string(),
                input: Some(json!({"q": "rust"})),
            },
            ContentBlock::ToolResult {
                result: json!({"hits": 3}),
            },
            ContentBlock::Image {
                caption: Some("a chart".to_string()),
            },
            ContentBlock::Other {
                kind: "video".to_string(),
            },
        ];

        let text = blocks_to_text(&blocks);
        assert!(text.contains("hello"));
        assert!(text.contains("```rust\nlet x = 1;\n```"));
        assert!(text.contains("[Tool use: search]"));
        assert!(text.contains(r#"[Tool result: {"hits":3}]"#));
        assert!(text.contains("[Image: a chart]"));
        assert!(text.contains("[video content]"));
    }

    #[test]
    fn test_blocks_to_text_is_deterministic() {
        let blocks = vec![
            ContentBlock::text("a"),
            ContentBlock::Image { caption: None },
            ContentBlock::text("b"),
        ];
        assert_eq!(blocks_to_text(&blocks), blocks_to_text(&blocks));
        assert_eq!(blocks_to_text(&blocks), "a\n[Image: ]\nb");
    }

    #[test]
    fn test_blocks_to_text_empty_input() {
        assert_eq!(blocks_to_text(&[]), "");
    }

    #[test]
    fn test_code_without_language() {
        let blocks = vec![ContentBlock::Code {
            code: "print(1)".to_string(),
            language: None,
        }];
        assert_eq!(blocks_to_text(&blocks), "```\nprint(1)\n```");
    }

    #[test]
    fn test_request_messages_from_prompt() {
        let request = CompletionRequest::from_prompt("gpt-4", "Hi there");
        let messages = request_messages(&request).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(message_text(&messages[0]), "Hi there");
    }

    #[test]
    fn test_request_messages_preserves_order() {
        let request = CompletionRequest::from_messages(
            "claude-3-haiku",
            vec![
                Message::system("be terse"),
                Message::user("one"),
                Message::assistant("two"),
                Message::user("three"),
            ],
        );
        let messages = request_messages(&request).unwrap();
        let texts: Vec<String> = messages.iter().map(message_text).collect();
        assert_eq!(texts, vec!["be terse", "one", "two", "three"]);
    }

    #[test]
    fn test_empty_message_list_rejected() {
        let request = CompletionRequest::from_messages("gpt-4", vec![]);
        let err = request_messages(&request).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
