use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use conductor_core::config::{AppConfig, ModelConfig, TurnConfig};
use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::traits::{LlmClient, ToolExecutor};
use conductor_core::types::*;

use super::plan::{split_tracking, Plan, PlanTracker};
use crate::tool_call::{extract_tool_calls, strip_structural_tags, ParsedToolCall};

const MISSING_TOOLS_NUDGE: &str = "You described what to do but did not call any tools. \
Carry out the request now by emitting the required tool calls, each in the form \
<tool_call>{\"name\": \"tool_name\", \"arguments\": {...}}</tool_call>.";

/// Longest tool result echoed back to the model in a follow-up.
const MAX_RESULT_CHARS: usize = 2_000;

/// Input for one assistant turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub system_prompt: Option<String>,
    /// Earlier conversation, oldest first.
    pub history: Vec<ChatMessage>,
    /// The user message that starts this turn.
    pub message: String,
    /// Tool names offered to the model.
    pub tools: Vec<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }
}

/// Result of one turn. Partial plan completion shows in `completed_step_indices`.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: TurnId,
    /// The last assistant response with tool-call and plan tags removed.
    /// Empty when that response held nothing but tags.
    pub content: String,
    /// Every executed tool call, in order.
    pub tool_results: Vec<ToolResult>,
    pub reasoning: Option<String>,
    pub todos: Option<Vec<String>>,
    pub completed_step_indices: Option<Vec<usize>>,
    /// A tool paused the turn for the human.
    pub waiting_for_user: bool,
    pub llm_calls: usize,
}

/// Mutable state of one turn.
struct TurnState {
    messages: Vec<ChatMessage>,
    results: Vec<ToolResult>,
    plan: Option<Plan>,
    tracker: PlanTracker,
    waiting: bool,
    llm_calls: usize,
    /// Latest response text with structural tags stripped.
    last_text: String,
}

/// Drives one assistant turn against a model that may or may not call tools reliably.
///
/// The turn makes a first call, runs the tools it asked for, then applies at
/// most one no-action nudge, at most one incomplete-plan nudge and at most
/// `max_follow_up_rounds` follow-up rounds. A tool result carrying
/// `waitingForUser` ends the turn early.
pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
    model: ModelConfig,
    config: TurnConfig,
    action_pattern: Option<Regex>,
    event_bus: Arc<EventBus>,
}

impl TurnOrchestrator {
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            tools,
            model: config.model.clone(),
            action_pattern: action_pattern(&config.turn.action_keywords)?,
            config: config.turn.clone(),
            event_bus,
        })
    }

    /// Use a different model than `[model]`.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Whether `text` reads like a request to do something.
    pub fn looks_like_action(&self, text: &str) -> bool {
        self.action_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(text))
    }

    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let turn_id = TurnId::new();
        self.event_bus.publish(AgentEvent::TurnStarted {
            turn_id: turn_id.clone(),
        });
        info!(turn_id = %turn_id, tools = request.tools.len(), "Starting turn");

        let definitions = if request.tools.is_empty() {
            vec![]
        } else {
            self.tools.definitions(&request.tools)
        };

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(ref system) = request.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(request.history.iter().cloned());
        messages.push(ChatMessage::user(request.message.clone()));

        let mut state = TurnState {
            messages,
            results: Vec::new(),
            plan: None,
            tracker: PlanTracker::default(),
            waiting: false,
            llm_calls: 0,
            last_text: String::new(),
        };

        // First response: plan, then tools.
        let response = self.call(&mut state, &definitions).await?;
        self.adopt_plan(&turn_id, &response.content, &mut state);
        let executed = self.execute_calls(&response, &mut state).await?;

        if executed == 0
            && self.config.nudge_on_missing_tools
            && self.looks_like_action(&request.message)
        {
            info!(turn_id = %turn_id, "No tool calls for an action request, nudging");
            self.event_bus.publish(AgentEvent::NudgeIssued {
                kind: NudgeKind::MissingToolCalls,
            });
            state.messages.push(ChatMessage::user(MISSING_TOOLS_NUDGE));
            let response = self.call(&mut state, &definitions).await?;
            if state.plan.is_none() {
                self.adopt_plan(&turn_id, &response.content, &mut state);
            }
            self.execute_calls(&response, &mut state).await?;
        }

        if self.config.nudge_on_incomplete_plan
            && !state.waiting
            && !state.tracker.todos().is_empty()
            && !state.tracker.is_complete()
        {
            info!(
                turn_id = %turn_id,
                completed = state.tracker.completed().len(),
                todos = state.tracker.todos().len(),
                "Plan incomplete, nudging"
            );
            self.event_bus.publish(AgentEvent::NudgeIssued {
                kind: NudgeKind::IncompletePlan,
            });
            let nudge = incomplete_plan_message(&state.results, &state.tracker);
            state.messages.push(ChatMessage::user(nudge));
            let response = self.call(&mut state, &definitions).await?;
            self.execute_calls(&response, &mut state).await?;
        }

        // Every round spends one call, whether or not the previous one ran tools.
        let mut round = 0;
        while !state.results.is_empty()
            && round < self.config.max_follow_up_rounds
            && !state.waiting
        {
            round += 1;
            debug!(turn_id = %turn_id, round, "Follow-up round");
            self.event_bus.publish(AgentEvent::FollowUpRound { round });

            let summary = follow_up_message(&state.results);
            state.messages.push(ChatMessage::user(summary));
            let response = self.call(&mut state, &definitions).await?;
            self.execute_calls(&response, &mut state).await?;
        }

        let tool_calls = state.results.len();
        self.event_bus.publish(AgentEvent::TurnComplete {
            turn_id: turn_id.clone(),
            tool_calls,
            waiting_for_user: state.waiting,
        });
        info!(
            turn_id = %turn_id,
            tool_calls,
            llm_calls = state.llm_calls,
            waiting_for_user = state.waiting,
            "Turn complete"
        );

        let has_todos = !state.tracker.todos().is_empty();
        Ok(TurnOutcome {
            turn_id,
            content: state.last_text,
            completed_step_indices: has_todos.then(|| state.tracker.completed()),
            todos: has_todos.then(|| state.tracker.todos().to_vec()),
            reasoning: state.plan.and_then(|p| p.reasoning),
            tool_results: state.results,
            waiting_for_user: state.waiting,
            llm_calls: state.llm_calls,
        })
    }

    /// One LLM call over the current conversation. The reply is appended as assistant text.
    async fn call(
        &self,
        state: &mut TurnState,
        definitions: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let mut request = self.model.request(state.messages.clone());
        request.tools = definitions.to_vec();
        let response = self.llm.chat(request).await?;
        state.llm_calls += 1;

        state
            .messages
            .push(ChatMessage::assistant_text(response.content.clone()));
        state.last_text = strip_structural_tags(&response.content);
        Ok(response)
    }

    fn adopt_plan(&self, turn_id: &TurnId, text: &str, state: &mut TurnState) {
        let Some(plan) = Plan::parse(text) else { return };
        debug!(turn_id = %turn_id, todos = plan.todos.len(), "Parsed plan");
        self.event_bus.publish(AgentEvent::PlanParsed {
            turn_id: turn_id.clone(),
            reasoning: plan.reasoning.clone(),
            todos: plan.todos.clone(),
        });
        state.tracker = PlanTracker::new(plan.todos.clone());
        state.plan = Some(plan);
    }

    /// Run every call in `response`: tagged text calls first, then native ones.
    ///
    /// Returns how many ran. Tool errors propagate.
    async fn execute_calls(&self, response: &LlmResponse, state: &mut TurnState) -> Result<usize> {
        let extraction = extract_tool_calls(&response.content);
        if extraction.malformed > 0 {
            warn!(malformed = extraction.malformed, "Skipped malformed tool calls");
        }
        let calls = extraction
            .calls
            .into_iter()
            .chain(response.tool_calls.iter().map(|c| ParsedToolCall {
                name: c.name.clone(),
                args: c.parsed_arguments(),
            }));

        let mut executed = 0;
        for call in calls {
            let (args, tracking) = split_tracking(call.args);

            self.event_bus.publish(AgentEvent::ToolStart {
                name: call.name.clone(),
                args: args.clone(),
            });
            let result = self.tools.execute(&call.name, args.clone()).await?;
            self.event_bus.publish(AgentEvent::ToolEnd {
                name: call.name.clone(),
                result: result.clone(),
            });

            if let Some(index) = state.tracker.record(&tracking) {
                debug!(index, tool = %call.name, "Todo completed");
                self.event_bus.publish(AgentEvent::TodoCompleted { index });
            }

            let result = ToolResult {
                name: call.name,
                args,
                result,
            };
            if result.is_waiting_for_user() {
                info!(tool = %result.name, "Tool is waiting for the user, ending turn");
                state.waiting = true;
            }
            state.results.push(result);
            executed += 1;
        }
        Ok(executed)
    }
}

/// Case-insensitive whole-word match on any action keyword. `None` when there are no keywords.
fn action_pattern(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| regex::escape(k).replace(' ', r"\s+"))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
        .map(Some)
        .map_err(|e| ConductorError::Config(format!("invalid action keyword: {}", e)))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}… (truncated)", cut)
}

fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn incomplete_plan_message(results: &[ToolResult], tracker: &PlanTracker) -> String {
    let ran = if results.is_empty() {
        "none".to_string()
    } else {
        results
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let remaining = tracker
        .remaining()
        .iter()
        .map(|(i, todo)| format!("{}. {}", i, todo))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Your plan is not finished. Tools already run: {}.\n\n\
         Remaining steps:\n{}\n\n\
         Emit the tool calls for the remaining steps. Give each call \"todoIndex\" \
         for its step and \"completeTodo\": true once the step is done.",
        ran, remaining
    )
}

fn follow_up_message(results: &[ToolResult]) -> String {
    let lines = results
        .iter()
        .map(|r| {
            format!(
                "- {} {}: {}",
                r.name,
                r.args,
                truncate(&result_text(&r.result), MAX_RESULT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Tool results so far:\n{}\n\n\
         If the request is complete, reply to the user with a short summary. \
         Otherwise emit the next tool calls.",
        lines
    )
}
