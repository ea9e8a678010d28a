use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use conductor_core::error::{ConductorError, Result};

use super::transform::value_text;

/// A declared argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_required() -> bool {
    true
}

/// A named prompt with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub template: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            arguments: vec![],
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            required,
            description: String::new(),
        });
        self
    }

    /// Check supplied arguments against the declared ones.
    ///
    /// Every required argument must be present and no undeclared argument may be supplied.
    pub fn validate(&self, args: &serde_json::Map<String, Value>) -> Result<()> {
        for arg in self.arguments.iter().filter(|a| a.required) {
            if !args.contains_key(&arg.name) {
                return Err(ConductorError::ArgumentValidation {
                    prompt: self.id.clone(),
                    message: format!("missing required argument '{}'", arg.name),
                });
            }
        }
        if let Some(unknown) = args
            .keys()
            .find(|k| !self.arguments.iter().any(|a| &a.name == *k))
        {
            return Err(ConductorError::ArgumentValidation {
                prompt: self.id.clone(),
                message: format!("unknown argument '{}'", unknown),
            });
        }
        Ok(())
    }

    /// Validate then substitute `{{name}}` (or `{{ name }}`) for every declared argument.
    ///
    /// Optional arguments that were not supplied render as empty text.
    pub fn render(&self, args: &serde_json::Map<String, Value>) -> Result<String> {
        self.validate(args)?;
        let mut text = self.template.clone();
        for PromptArgument { name, .. } in &self.arguments {
            let replacement = args.get(name).map(value_text).unwrap_or_default();
            text = text
                .replace(&format!("{{{{{}}}}}", name), &replacement)
                .replace(&format!("{{{{ {} }}}}", name), &replacement);
        }
        Ok(text)
    }
}

/// Prompt templates keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PromptStore {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn with(mut self, template: PromptTemplate) -> Self {
        self.insert(template);
        self
    }

    pub fn get(&self, id: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| ConductorError::PromptNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Load a JSON array of templates.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let templates: Vec<PromptTemplate> = serde_json::from_str(&content)?;
        Ok(templates.into_iter().fold(Self::new(), Self::with))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summarize() -> PromptTemplate {
        PromptTemplate::new("summarize", "Summarize {{topic}} in {{ style }} style.")
            .with_argument("topic", true)
            .with_argument("style", false)
    }

    fn args(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn renders_both_placeholder_forms() {
        let text = summarize()
            .render(&args(json!({"topic": "tokio", "style": "terse"})))
            .unwrap();
        assert_eq!(text, "Summarize tokio in terse style.");
    }

    #[test]
    fn unsupplied_optional_argument_renders_empty() {
        let text = summarize().render(&args(json!({"topic": "tokio"}))).unwrap();
        assert_eq!(text, "Summarize tokio in  style.");
        assert!(!text.contains("{{"));
    }

    #[test]
    fn missing_required_argument_fails() {
        let err = summarize().render(&args(json!({"style": "terse"}))).unwrap_err();
        assert!(matches!(err, ConductorError::ArgumentValidation { .. }));
    }

    #[test]
    fn undeclared_argument_fails() {
        let err = summarize()
            .validate(&args(json!({"topic": "x", "tone": "dry"})))
            .unwrap_err();
        assert!(err.to_string().contains("tone"));
    }

    #[test]
    fn unknown_prompt_is_not_found() {
        let store = PromptStore::new().with(summarize());
        assert!(store.get("summarize").is_ok());
        assert!(matches!(
            store.get("nope").unwrap_err(),
            ConductorError::PromptNotFound(_)
        ));
    }
}
