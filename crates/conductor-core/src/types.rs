use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one assistant turn.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured tool call as returned by providers with native function calling.
///
/// `arguments` is the raw JSON string the provider emitted; it is parsed lazily
/// because providers do not always emit valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the argument string, defaulting to `{}` when it is not valid JSON.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

/// A chat message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// An assistant message that requested native tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::with_role(Role::Assistant, text)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// A definition carrying only the tool name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({ "type": "object" }),
        }
    }
}

/// A single request to an LLM backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete (non-streaming) LLM response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            usage: None,
        }
    }
}

/// One executed tool call. The ordered list across a turn is its audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
}

impl ToolResult {
    /// Whether the tool paused the turn to wait for the human (questions, credential prompts).
    pub fn is_waiting_for_user(&self) -> bool {
        ["waitingForUser", "waitingForCredentials"]
            .iter()
            .any(|key| self.result.get(key).and_then(|v| v.as_bool()) == Some(true))
    }
}

/// One step of a heap priority order: a single specialist or a parallel group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeapStep {
    Specialist(String),
    Parallel { parallel: Vec<String> },
}

impl HeapStep {
    pub fn parallel<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Parallel {
            parallel: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&str> for HeapStep {
    fn from(id: &str) -> Self {
        Self::Specialist(id.to_string())
    }
}

/// What one specialist run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialistResult {
    /// One or two lines describing the outcome.
    pub summary: String,
    /// A nested priority order to run before the parent level continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_heap: Option<Vec<HeapStep>>,
    /// Task for the delegated run. Defaults to the parent task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate_task: Option<String>,
}

impl SpecialistResult {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_delegation(mut self, heap: Vec<HeapStep>, task: Option<String>) -> Self {
        self.delegate_heap = Some(heap);
        self.delegate_task = task;
        self
    }
}

/// One `{specialist, outcome}` pair of the heap context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub specialist_id: String,
    pub outcome: String,
}

/// Outcomes accumulated across heap levels, keeping only the newest `cap` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapContextSummary {
    entries: VecDeque<ContextEntry>,
    cap: usize,
}

impl HeapContextSummary {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
        }
    }

    /// Append an outcome, dropping the oldest entries beyond the cap.
    pub fn push(&mut self, specialist_id: impl Into<String>, outcome: impl Into<String>) {
        self.entries.push_back(ContextEntry {
            specialist_id: specialist_id.into(),
            outcome: outcome.into(),
        });
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Outcome of the most recent entry.
    pub fn last_outcome(&self) -> Option<&str> {
        self.entries.back().map(|e| e.outcome.as_str())
    }

    /// `- specialist: outcome` lines for prompts.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {}: {}", e.specialist_id, e.outcome))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for HeapContextSummary {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Which corrective message the turn orchestrator sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeKind {
    /// The request asked for action but the model emitted no tool calls.
    MissingToolCalls,
    /// The model declared a plan and left steps incomplete.
    IncompletePlan,
}

/// Agent event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A turn started.
    TurnStarted { turn_id: TurnId },
    /// The first response declared a plan. Always published before any tool runs.
    PlanParsed {
        turn_id: TurnId,
        reasoning: Option<String>,
        todos: Vec<String>,
    },
    /// Tool execution started.
    ToolStart { name: String, args: serde_json::Value },
    /// Tool execution completed.
    ToolEnd { name: String, result: serde_json::Value },
    /// A todo step was completed for the first time.
    TodoCompleted { index: usize },
    /// A corrective message was sent to the model.
    NudgeIssued { kind: NudgeKind },
    /// A follow-up round started (1-based).
    FollowUpRound { round: usize },
    /// A turn finished.
    TurnComplete {
        turn_id: TurnId,
        tool_calls: usize,
        waiting_for_user: bool,
    },
    /// A node of a node-agent graph started.
    NodeStarted { node_id: String, node_type: String },
    /// A node of a node-agent graph produced its output.
    NodeCompleted { node_id: String },
    /// A heap level started.
    HeapLevelStarted {
        depth: usize,
        level: usize,
        specialists: Vec<String>,
    },
    /// A specialist returned its result.
    SpecialistCompleted {
        specialist_id: String,
        depth: usize,
        summary: String,
    },
    /// A specialist's delegation request is being run as a sub-heap.
    DelegationStarted { specialist_id: String, depth: usize },
    /// A delegation request was dropped because the depth limit was reached.
    DelegationSkipped { specialist_id: String, depth: usize },
    /// An LLM call waited on the rate gate.
    RateLimited { key: String, wait_ms: u64 },
}
