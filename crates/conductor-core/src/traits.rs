use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{HeapContextSummary, LlmRequest, LlmResponse, SpecialistResult, ToolDefinition};

/// LLM client — one request, one complete response.
///
/// Implementations must tolerate being called repeatedly within one turn and
/// return transport errors unmodified.
pub trait LlmClient: Send + Sync + 'static {
    fn chat(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>>;
}

/// Tool executor — runs a named tool with JSON arguments.
///
/// Tools that need the human to respond return an object containing
/// `"waitingForUser": true` (or `"waitingForCredentials": true`).
pub trait ToolExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        name: &'a str,
        args: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;

    /// Definitions for the given tool names, sent to the LLM with each request.
    fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        names.iter().map(ToolDefinition::named).collect()
    }
}

/// Runs one specialist of a heap against a task.
///
/// `context` is a read-only snapshot of the outcomes gathered so far; every
/// specialist of a level sees the same snapshot.
pub trait SpecialistRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        specialist_id: &'a str,
        task: &'a str,
        context: &'a HeapContextSummary,
    ) -> BoxFuture<'a, Result<SpecialistResult>>;
}
