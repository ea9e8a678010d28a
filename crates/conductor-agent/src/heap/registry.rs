use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use conductor_core::error::Result;

use crate::graph::NodeAgent;

/// A specialist the heap can route work to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialistInfo {
    pub id: String,
    /// Human-readable description, shown to the planner.
    #[serde(default)]
    pub description: String,
    /// Words that route a task to this specialist when no planner is available.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// System prompt for turn-based specialists.
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    /// Tools a turn-based specialist may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// A node-agent graph. When present the specialist runs as a graph instead of a turn.
    #[serde(default)]
    pub agent: Option<NodeAgent>,
}

impl SpecialistInfo {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_agent(mut self, agent: NodeAgent) -> Self {
        self.agent = Some(agent);
        self
    }
}

/// All known specialists plus the ordered ids a top-level heap may start from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialistRegistry {
    #[serde(default, alias = "topLevelIds")]
    pub top_level_ids: Vec<String>,
    #[serde(default)]
    pub specialists: HashMap<String, SpecialistInfo>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a specialist; `top_level` also appends it to the top-level ids.
    pub fn register(&mut self, info: SpecialistInfo, top_level: bool) {
        if top_level && !self.top_level_ids.contains(&info.id) {
            self.top_level_ids.push(info.id.clone());
        }
        self.specialists.insert(info.id.clone(), info);
    }

    pub fn with(mut self, info: SpecialistInfo, top_level: bool) -> Self {
        self.register(info, top_level);
        self
    }

    pub fn get(&self, id: &str) -> Option<&SpecialistInfo> {
        self.specialists.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specialists.contains_key(id)
    }

    pub fn first_top_level(&self) -> Option<&str> {
        self.top_level_ids.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.top_level_ids.is_empty() && self.specialists.is_empty()
    }

    /// Top-level specialists in order, then the rest sorted by id.
    pub fn ordered(&self) -> Vec<&SpecialistInfo> {
        let mut out: Vec<&SpecialistInfo> = self
            .top_level_ids
            .iter()
            .filter_map(|id| self.specialists.get(id))
            .collect();
        let mut rest: Vec<&SpecialistInfo> = self
            .specialists
            .values()
            .filter(|s| !self.top_level_ids.contains(&s.id))
            .collect();
        rest.sort_by(|a, b| a.id.cmp(&b.id));
        out.extend(rest);
        out
    }

    /// `- id: description` lines for planner prompts.
    pub fn describe(&self) -> String {
        self.ordered()
            .iter()
            .map(|s| format!("- {}: {}", s.id, s.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Load a registry from JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_tracks_top_level_order() {
        let registry = SpecialistRegistry::new()
            .with(SpecialistInfo::new("writer", "Writes docs"), true)
            .with(SpecialistInfo::new("helper", "Internal helper"), false)
            .with(SpecialistInfo::new("coder", "Writes code"), true);
        assert_eq!(registry.top_level_ids, vec!["writer", "coder"]);
        assert_eq!(registry.first_top_level(), Some("writer"));
        assert_eq!(
            registry.describe(),
            "- writer: Writes docs\n- coder: Writes code\n- helper: Internal helper"
        );
    }

    #[test]
    fn parses_camel_case_registry() {
        let registry: SpecialistRegistry = serde_json::from_str(
            r#"{"topLevelIds": ["a"], "specialists": {"a": {"id": "a", "description": "A", "keywords": ["alpha"]}}}"#,
        )
        .unwrap();
        assert!(registry.contains("a"));
        assert_eq!(registry.get("a").map(|s| s.keywords.len()), Some(1));
    }
}
