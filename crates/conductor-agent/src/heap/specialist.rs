use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::SpecialistRunner;
use conductor_core::types::{HeapContextSummary, HeapStep, SpecialistResult};

use super::registry::{SpecialistInfo, SpecialistRegistry};
use crate::graph::transform::value_text;
use crate::graph::{NodeAgentExecutor, SharedContext};
use crate::turn::{TurnOrchestrator, TurnRequest};

/// Runs registry specialists as turns, or as node-agent graphs when they define one.
///
/// A `delegateHeap` (with optional `delegateTask`) found in a tool result or in
/// a graph's output becomes the specialist's delegation request.
pub struct AgentSpecialistRunner {
    registry: Arc<SpecialistRegistry>,
    turns: Arc<TurnOrchestrator>,
    graphs: Option<Arc<NodeAgentExecutor>>,
}

impl AgentSpecialistRunner {
    pub fn new(registry: Arc<SpecialistRegistry>, turns: Arc<TurnOrchestrator>) -> Self {
        Self {
            registry,
            turns,
            graphs: None,
        }
    }

    pub fn with_graph_executor(mut self, graphs: Arc<NodeAgentExecutor>) -> Self {
        self.graphs = Some(graphs);
        self
    }

    async fn run_specialist(
        &self,
        info: &SpecialistInfo,
        task: &str,
        context: &HeapContextSummary,
    ) -> Result<SpecialistResult> {
        let prompt = task_prompt(task, context);

        if let (Some(agent), Some(graphs)) = (&info.agent, &self.graphs) {
            debug!(specialist = %info.id, "Running specialist as node agent");
            let output = graphs
                .execute(agent, Value::String(prompt), &mut SharedContext::new())
                .await?;
            let summary = match output.get("summary").and_then(Value::as_str) {
                Some(summary) => first_lines(summary),
                None => first_lines(&value_text(&output)),
            };
            return Ok(with_delegation(summary, delegation_from(&output)));
        }

        debug!(specialist = %info.id, "Running specialist as turn");
        let mut request = TurnRequest::new(prompt).with_tools(info.tools.clone());
        if let Some(ref system) = info.system_prompt {
            request = request.with_system_prompt(system.clone());
        }
        let outcome = self.turns.run_turn(request).await?;

        let mut summary = first_lines(&outcome.content);
        if summary.is_empty() {
            summary = format!("Completed with {} tool calls.", outcome.tool_results.len());
        }
        let delegation = outcome
            .tool_results
            .iter()
            .rev()
            .find_map(|r| delegation_from(&r.result));
        Ok(with_delegation(summary, delegation))
    }
}

impl SpecialistRunner for AgentSpecialistRunner {
    fn run<'a>(
        &'a self,
        specialist_id: &'a str,
        task: &'a str,
        context: &'a HeapContextSummary,
    ) -> BoxFuture<'a, Result<SpecialistResult>> {
        Box::pin(async move {
            let info = self
                .registry
                .get(specialist_id)
                .ok_or_else(|| ConductorError::Specialist {
                    specialist: specialist_id.to_string(),
                    message: "not registered".into(),
                })?;
            self.run_specialist(info, task, context).await
        })
    }
}

fn task_prompt(task: &str, context: &HeapContextSummary) -> String {
    if context.is_empty() {
        return task.to_string();
    }
    format!(
        "## Previous specialist outcomes\n\n{}\n\n---\n\n{}",
        context.render(),
        task
    )
}

/// The first two non-empty lines, trimmed and joined.
fn first_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join("\n")
}

fn delegation_from(value: &Value) -> Option<(Vec<HeapStep>, Option<String>)> {
    let heap = value.get("delegateHeap")?;
    let steps: Vec<HeapStep> = serde_json::from_value(heap.clone()).ok()?;
    if steps.is_empty() {
        return None;
    }
    let task = value
        .get("delegateTask")
        .and_then(Value::as_str)
        .map(String::from);
    Some((steps, task))
}

fn with_delegation(
    summary: String,
    delegation: Option<(Vec<HeapStep>, Option<String>)>,
) -> SpecialistResult {
    let result = SpecialistResult::summary(summary);
    match delegation {
        Some((steps, task)) => result.with_delegation(steps, task),
        None => result,
    }
}
