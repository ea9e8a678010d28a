//! Mocks and fixtures shared by the Conductor test suites.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use conductor_core::config::AppConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::{SpecialistRunner, ToolExecutor};
use conductor_core::types::{HeapContextSummary, LlmResponse, SpecialistResult, ToolCall};

pub use conductor_llm::ScriptedClient;

enum Canned {
    Value(Value),
    Error(String),
}

/// A tool executor that records every call and answers from canned results.
///
/// Tools without a canned result answer `{"status": "ok"}`.
#[derive(Default)]
pub struct RecordingTools {
    results: HashMap<String, Canned>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, name: &str, result: Value) -> Self {
        self.results.insert(name.to_string(), Canned::Value(result));
        self
    }

    /// Make `name` fail with a `ToolExecution` error.
    pub fn with_error(mut self, name: &str, message: &str) -> Self {
        self.results
            .insert(name.to_string(), Canned::Error(message.to_string()));
        self
    }

    /// A tool that pauses the turn for the human.
    pub fn with_ask_user(self, name: &str) -> Self {
        self.with_result(name, json!({"waitingForUser": true, "question": "Which one?"}))
    }

    /// Every `(name, args)` pair received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }
}

impl ToolExecutor for RecordingTools {
    fn execute<'a>(&'a self, name: &'a str, args: Value) -> BoxFuture<'a, Result<Value>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), args));
        let outcome = match self.results.get(name) {
            Some(Canned::Value(v)) => Ok(v.clone()),
            Some(Canned::Error(message)) => Err(ConductorError::ToolExecution {
                tool: name.to_string(),
                message: message.clone(),
            }),
            None => Ok(json!({"status": "ok"})),
        };
        Box::pin(async move { outcome })
    }
}

type SpecialistFn =
    dyn Fn(&str, &str, &HeapContextSummary) -> Result<SpecialistResult> + Send + Sync;

/// A specialist runner backed by a closure, recording every invocation.
pub struct FnSpecialistRunner {
    f: Box<SpecialistFn>,
    calls: Mutex<Vec<SpecialistCall>>,
}

/// One recorded specialist invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialistCall {
    pub specialist_id: String,
    pub task: String,
    /// Number of context entries the specialist saw.
    pub context_len: usize,
}

impl FnSpecialistRunner {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &HeapContextSummary) -> Result<SpecialistResult> + Send + Sync + 'static,
    {
        Self {
            f: Box::new(f),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every specialist answers `"<id> done"`.
    pub fn echo() -> Self {
        Self::new(|id, _, _| Ok(SpecialistResult::summary(format!("{} done", id))))
    }

    pub fn calls(&self) -> Vec<SpecialistCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn called_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.specialist_id).collect()
    }
}

impl SpecialistRunner for FnSpecialistRunner {
    fn run<'a>(
        &'a self,
        specialist_id: &'a str,
        task: &'a str,
        context: &'a HeapContextSummary,
    ) -> BoxFuture<'a, Result<SpecialistResult>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SpecialistCall {
                specialist_id: specialist_id.to_string(),
                task: task.to_string(),
                context_len: context.len(),
            });
        let outcome = (self.f)(specialist_id, task, context);
        Box::pin(async move { outcome })
    }
}

/// A scripted client shared between the code under test and the assertions.
pub fn scripted<I, S>(texts: I) -> Arc<ScriptedClient>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(ScriptedClient::from_texts(texts))
}

/// A response carrying one native tool call.
pub fn native_call(name: &str, args: Value) -> LlmResponse {
    LlmResponse::with_tool_calls("", vec![ToolCall::new(name, args.to_string())])
}

/// A `<tool_call>` tag for `name` with `args`.
pub fn tool_call_tag(name: &str, args: Value) -> String {
    format!(
        "<tool_call>{}</tool_call>",
        json!({"name": name, "arguments": args})
    )
}

/// Config with small limits, suitable for fast tests.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.model.model_id = "test-model".into();
    config.rate_gate.requests_per_minute = 1_000;
    config.rate_gate.tokens_per_minute = 10_000_000;
    config
}

/// Write `content` to a temp `conductor.toml`, returning the dir guard and path.
pub fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("conductor.toml");
    std::fs::write(&path, content).expect("write temp config");
    (dir, path)
}
