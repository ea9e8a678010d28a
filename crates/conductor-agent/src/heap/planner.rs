//! Producing a priority order for a task.
//!
//! `HeapPlanner` asks the LLM to route the task across the registry and falls
//! back to keyword matching when the reply has no usable order.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use conductor_core::config::ModelConfig;
use conductor_core::error::Result;
use conductor_core::traits::LlmClient;
use conductor_core::types::{ChatMessage, HeapStep};

use super::registry::SpecialistRegistry;
use crate::tool_call::first_json_object;

/// Route a task by keyword: every top-level specialist whose id or keywords
/// appear in the task, in registry order, one step each.
///
/// Returns an empty order when nothing matches; the runner then falls back to
/// the first top-level specialist.
pub fn infer_priority_order(task: &str, registry: &SpecialistRegistry) -> Vec<HeapStep> {
    let lowered = task.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|w| !w.is_empty())
        .collect();

    let matches = |term: &str| {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            false
        } else if term.contains(char::is_whitespace) {
            lowered.contains(&term)
        } else {
            words.contains(term.as_str())
        }
    };

    registry
        .top_level_ids
        .iter()
        .filter_map(|id| registry.get(id))
        .filter(|s| matches(&s.id) || s.keywords.iter().any(|k| matches(k)))
        .map(|s| HeapStep::Specialist(s.id.clone()))
        .collect()
}

/// Keep only ids the registry knows. Groups shrink, and empty groups vanish.
fn known_steps(steps: Vec<HeapStep>, registry: &SpecialistRegistry) -> Vec<HeapStep> {
    steps
        .into_iter()
        .filter_map(|step| match step {
            HeapStep::Specialist(id) if registry.contains(&id) => Some(HeapStep::Specialist(id)),
            HeapStep::Specialist(id) => {
                debug!(specialist = %id, "Dropping unknown specialist from plan");
                None
            }
            HeapStep::Parallel { parallel } => {
                let ids: Vec<String> = parallel
                    .into_iter()
                    .filter(|id| registry.contains(id))
                    .collect();
                match ids.len() {
                    0 => None,
                    1 => ids.into_iter().next().map(HeapStep::Specialist),
                    _ => Some(HeapStep::Parallel { parallel: ids }),
                }
            }
        })
        .collect()
}

/// Pull `priorityOrder` (or a bare array) out of a planner reply.
pub fn parse_priority_order(reply: &str) -> Option<Vec<HeapStep>> {
    let keyed = match first_json_object(reply) {
        Some(Value::Object(mut obj)) => obj
            .remove("priorityOrder")
            .or_else(|| obj.remove("priority_order")),
        _ => None,
    };
    let value = match keyed {
        Some(value) => value,
        None => {
            let start = reply.find('[')?;
            let end = reply.rfind(']')?;
            serde_json::from_str(reply.get(start..=end)?).ok()?
        }
    };
    serde_json::from_value(value).ok()
}

/// LLM-backed planner.
pub struct HeapPlanner {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
}

impl HeapPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self { llm, model }
    }

    fn prompt(task: &str, registry: &SpecialistRegistry) -> String {
        format!(
            "Route the task below to the available specialists.\n\n\
             ## Specialists\n\n{}\n\n\
             ## Task\n\n{}\n\n\
             Reply with only a JSON object of the form \
             {{\"priorityOrder\": [\"id\", {{\"parallel\": [\"id\", \"id\"]}}, \"id\"]}}. \
             Steps run in order; ids inside a parallel group run at the same time. \
             Use only ids from the list.",
            registry.describe(),
            task
        )
    }

    /// Ask the LLM for a priority order, falling back to keywords when the reply is unusable.
    ///
    /// LLM transport errors propagate.
    pub async fn plan(&self, task: &str, registry: &SpecialistRegistry) -> Result<Vec<HeapStep>> {
        let request = self
            .model
            .request(vec![ChatMessage::user(Self::prompt(task, registry))]);
        let response = self.llm.chat(request).await?;

        let planned = parse_priority_order(&response.content)
            .map(|steps| known_steps(steps, registry))
            .unwrap_or_default();
        if planned.is_empty() {
            warn!("Planner reply had no usable priority order, using keyword routing");
            return Ok(infer_priority_order(task, registry));
        }
        debug!(steps = planned.len(), "Planner produced priority order");
        Ok(planned)
    }
}
