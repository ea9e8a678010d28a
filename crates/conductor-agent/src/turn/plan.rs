//! Plan metadata declared by the model and per-step completion tracking.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::tool_call::{reasoning_block, todos_block};

/// Reasoning and todo steps declared in a `<reasoning>` / `<todos>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub reasoning: Option<String>,
    pub todos: Vec<String>,
}

impl Plan {
    /// Parse plan blocks from `text`. `None` when neither block carries content.
    pub fn parse(text: &str) -> Option<Self> {
        let reasoning = reasoning_block(text);
        let todos = todos_block(text)
            .map(|block| parse_todo_lines(&block))
            .unwrap_or_default();
        if reasoning.is_none() && todos.is_empty() {
            None
        } else {
            Some(Self { reasoning, todos })
        }
    }
}

/// One step per non-empty line, with a leading bullet, number or checkbox removed.
pub fn parse_todo_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .map(strip_marker)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn strip_marker(line: &str) -> &str {
    let mut rest = line.trim();

    if let Some(stripped) = rest
        .strip_prefix('-')
        .or_else(|| rest.strip_prefix('*'))
        .or_else(|| rest.strip_prefix('•'))
    {
        rest = stripped.trim_start();
    } else {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            if let Some(stripped) = rest[digits..]
                .strip_prefix('.')
                .or_else(|| rest[digits..].strip_prefix(')'))
            {
                rest = stripped.trim_start();
            }
        }
    }

    for checkbox in ["[ ]", "[x]", "[X]", "[]"] {
        if let Some(stripped) = rest.strip_prefix(checkbox) {
            rest = stripped.trim_start();
            break;
        }
    }
    rest.trim_end()
}

/// Plan attribution pulled out of a call's arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracking {
    pub todo_index: Option<i64>,
    pub sub_step_index: Option<i64>,
    pub sub_step_label: Option<String>,
    pub complete_todo: bool,
}

fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Remove the tracking fields (`todoIndex`, `subStepIndex`, `subStepLabel`,
/// `completeTodo`) from `args`, returning the clean arguments and the tracking data.
pub fn split_tracking(args: Value) -> (Value, Tracking) {
    let mut map = match args {
        Value::Object(map) => map,
        other => return (other, Tracking::default()),
    };
    let mut take = |key: &str| map.remove(key);

    let tracking = Tracking {
        todo_index: take("todoIndex").as_ref().and_then(as_index),
        sub_step_index: take("subStepIndex").as_ref().and_then(as_index),
        sub_step_label: take("subStepLabel").and_then(|v| v.as_str().map(String::from)),
        complete_todo: matches!(take("completeTodo"), Some(Value::Bool(true))),
    };
    (Value::Object(map), tracking)
}

/// Which plan steps the turn's tool calls have completed.
#[derive(Debug, Clone, Default)]
pub struct PlanTracker {
    todos: Vec<String>,
    completed: BTreeSet<usize>,
    calls_seen: usize,
}

impl PlanTracker {
    pub fn new(todos: Vec<String>) -> Self {
        Self {
            todos,
            completed: BTreeSet::new(),
            calls_seen: 0,
        }
    }

    pub fn todos(&self) -> &[String] {
        &self.todos
    }

    /// Attribute one tool call to a step.
    ///
    /// The step is `todoIndex` clamped into range, or the call's position in
    /// the turn when absent. Returns the step index when this call completed it
    /// for the first time.
    pub fn record(&mut self, tracking: &Tracking) -> Option<usize> {
        let position = self.calls_seen;
        self.calls_seen += 1;
        if self.todos.is_empty() {
            return None;
        }

        let last = self.todos.len() - 1;
        let index = match tracking.todo_index {
            Some(i) if i < 0 => 0,
            Some(i) => (i as usize).min(last),
            None => position.min(last),
        };
        if tracking.complete_todo && self.completed.insert(index) {
            Some(index)
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() >= self.todos.len()
    }

    /// Completed step indices, ascending.
    pub fn completed(&self) -> Vec<usize> {
        self.completed.iter().copied().collect()
    }

    /// Steps not yet completed, as `(index, text)`.
    pub fn remaining(&self) -> Vec<(usize, &str)> {
        self.todos
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.completed.contains(i))
            .map(|(i, t)| (i, t.as_str()))
            .collect()
    }
}
