use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};
use crate::types::{ChatMessage, LlmRequest};

/// Top-level Conductor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    /// Named model configs, referenced by node `llm_config_id`.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub rate_gate: RateGateConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub heap: HeapConfig,
    #[serde(default)]
    pub node_agent: NodeAgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: None,
        }
    }
}

impl ModelConfig {
    /// A request to this model carrying `messages` and the configured sampling settings.
    pub fn request(&self, messages: Vec<ChatMessage>) -> LlmRequest {
        LlmRequest {
            model: self.model_id.clone(),
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            top_p: self.top_p,
            tools: vec![],
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.2 }

/// Sliding-window admission limits applied to every LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGateConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,
    /// Length of the sliding window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Upper bound on a single sleep between admission checks.
    #[serde(default = "default_max_check_secs")]
    pub max_check_secs: u64,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: default_tokens_per_minute(),
            window_secs: default_window_secs(),
            max_check_secs: default_max_check_secs(),
        }
    }
}

fn default_requests_per_minute() -> u32 { 60 }
fn default_tokens_per_minute() -> u64 { 100_000 }
fn default_window_secs() -> u64 { 60 }
fn default_max_check_secs() -> u64 { 5 }

/// Turn orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default = "default_max_follow_up_rounds")]
    pub max_follow_up_rounds: usize,
    #[serde(default = "default_true")]
    pub nudge_on_missing_tools: bool,
    #[serde(default = "default_true")]
    pub nudge_on_incomplete_plan: bool,
    /// Words that make a user message look like a request for action.
    #[serde(default = "default_action_keywords")]
    pub action_keywords: Vec<String>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_follow_up_rounds: default_max_follow_up_rounds(),
            nudge_on_missing_tools: true,
            nudge_on_incomplete_plan: true,
            action_keywords: default_action_keywords(),
        }
    }
}

fn default_max_follow_up_rounds() -> usize { 2 }
fn default_true() -> bool { true }

pub fn default_action_keywords() -> Vec<String> {
    [
        "create", "add", "fix", "configure", "workflow", "agent", "tool", "build", "update",
        "delete", "remove", "install", "setup", "set up", "connect", "schedule", "deploy",
        "run", "generate", "edit", "change", "modify", "rename", "enable", "disable",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Multi-specialist DAG limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Deepest depth at which a specialist may still delegate (top level is 0).
    #[serde(default = "default_depth_limit")]
    pub depth_limit: usize,
    /// Maximum number of `{specialist, outcome}` entries carried between levels.
    #[serde(default = "default_context_cap")]
    pub context_cap: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            depth_limit: default_depth_limit(),
            context_cap: default_context_cap(),
        }
    }
}

fn default_depth_limit() -> usize { 5 }
fn default_context_cap() -> usize { 10 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAgentConfig {
    /// Round cap for the LLM-with-tools loop of `llm` and `decision` nodes.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for NodeAgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_max_tool_rounds() -> usize { 20 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConductorError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| ConductorError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve a named model config, `None` when the id is unknown.
    pub fn model_by_id(&self, id: &str) -> Option<&ModelConfig> {
        self.models.get(id)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
