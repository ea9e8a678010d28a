use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::Deserialize;

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::LlmClient;
use conductor_core::types::{LlmRequest, LlmResponse};

/// One entry of a transcript file: either bare text or a full response object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Text(String),
    Response(LlmResponse),
}

/// An LLM client that replays a fixed list of responses in order.
///
/// Every request is recorded so callers can inspect what was sent. Once the
/// script runs out, further calls fail with `LlmRequest`.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script made of plain-text replies.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(LlmResponse::text).collect())
    }

    /// Load a JSON array of strings and/or response objects.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<ScriptEntry> = serde_json::from_str(&content).map_err(|e| {
            ConductorError::LlmParse(format!("invalid script {}: {}", path.display(), e))
        })?;
        Ok(Self::new(
            entries
                .into_iter()
                .map(|entry| match entry {
                    ScriptEntry::Text(text) => LlmResponse::text(text),
                    ScriptEntry::Response(response) => response,
                })
                .collect(),
        ))
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Responses not yet replayed.
    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LlmClient for ScriptedClient {
    fn chat(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        Box::pin(async move {
            next.ok_or_else(|| ConductorError::LlmRequest("scripted responses exhausted".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use conductor_core::types::ChatMessage;

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let client = ScriptedClient::from_texts(["first", "second"]);
        let request = LlmRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        assert_eq!(client.chat(request.clone()).await.unwrap().content, "first");
        assert_eq!(client.chat(request.clone()).await.unwrap().content, "second");
        assert!(client.chat(request).await.is_err());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.requests()[0].messages[0].content, "hi");
    }

    #[test]
    fn loads_mixed_transcript_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"["plain reply", {{"content": "with call", "tool_calls": [{{"id": "c1", "name": "search", "arguments": "{{}}"}}]}}]"#
        )
        .unwrap();
        let client = ScriptedClient::from_file(tmp.path()).unwrap();
        assert_eq!(client.remaining(), 2);
    }

    #[test]
    fn malformed_transcript_is_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"not": "an array"}}"#).unwrap();
        let err = ScriptedClient::from_file(tmp.path()).unwrap_err();
        assert!(matches!(err, ConductorError::LlmParse(_)));
    }
}
