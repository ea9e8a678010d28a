use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

use conductor_core::types::{ChatMessage, LlmRequest};

/// Per-message framing overhead added on top of the content tokens.
const MESSAGE_OVERHEAD: usize = 4;

/// The cl100k_base tokenizer, loaded once. `None` if its tables fail to load.
fn tokenizer() -> Option<&'static CoreBPE> {
    static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "Failed to load cl100k_base, counting one token per byte");
                None
            }
        })
        .as_ref()
}

/// BPE token count of `text` (cl100k_base).
pub fn estimate_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len(),
    }
}

/// Content plus tool-call arguments, with a fixed overhead per message.
pub fn estimate_message_tokens(msg: &ChatMessage) -> usize {
    let arguments: usize = msg
        .tool_calls
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments))
        .sum();
    estimate_tokens(&msg.content) + arguments + MESSAGE_OVERHEAD
}

/// Tokens a request may consume: its prompt plus the completion budget it asks for.
pub fn estimate_request_tokens(request: &LlmRequest) -> u64 {
    let prompt: usize = request.messages.iter().map(estimate_message_tokens).sum();
    prompt as u64 + u64::from(request.max_tokens.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::types::ToolCall;

    #[test]
    fn bpe_counts_fewer_tokens_than_bytes() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let tokens = estimate_tokens(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn message_includes_tool_arguments_and_overhead() {
        let plain = ChatMessage::user("search for it");
        assert_eq!(
            estimate_message_tokens(&plain),
            estimate_tokens("search for it") + MESSAGE_OVERHEAD
        );

        let mut with_call = plain.clone();
        with_call.tool_calls = vec![ToolCall::new("search", r#"{"q": "rust async"}"#.to_string())];
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain));
    }

    #[test]
    fn request_estimate_adds_completion_budget() {
        let request = LlmRequest {
            model: "m".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
            max_tokens: Some(100),
            ..Default::default()
        };
        let prompt: usize = request.messages.iter().map(estimate_message_tokens).sum();
        assert_eq!(estimate_request_tokens(&request), prompt as u64 + 100);
    }
}
