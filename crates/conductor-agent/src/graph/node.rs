use serde::{Deserialize, Serialize};
use serde_json::Value;

use conductor_core::error::ConductorError;

/// A node in a node-agent graph.
///
/// On the wire a node is `{"id": ..., "type": ..., "data": {...}}`. The `type`
/// selects a [`NodeKind`] and `data` is parsed into that kind's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
}

/// The closed set of node kinds, each with its own parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Prompt(PromptParams),
    Llm(LlmParams),
    Decision(LlmParams),
    Tool(ToolParams),
    ContextRead(ContextParams),
    ContextWrite(ContextParams),
    Input(TransformParams),
    Output(TransformParams),
    /// A type this engine does not know. Passes its input through.
    Unknown { node_type: String, data: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptParams {
    #[serde(alias = "promptId")]
    pub prompt_id: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
    #[serde(default, alias = "llmConfigId")]
    pub llm_config_id: Option<String>,
}

/// Parameters shared by `llm` and `decision` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmParams {
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    /// User message template; `{{ $input }}` is replaced with the node input.
    #[serde(default, alias = "userPrompt")]
    pub user_prompt: Option<String>,
    /// Retrieval results or tool instructions prefixed to the user message.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, alias = "llmConfigId")]
    pub llm_config_id: Option<String>,
    /// Node-scoped tool ids. `None` falls back to the agent's tool list.
    #[serde(default, alias = "toolIds")]
    pub tools: Option<Vec<String>>,
    /// Branch labels a decision node chooses between.
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParams {
    #[serde(alias = "toolId")]
    pub tool_id: String,
    /// Fixed arguments. When absent the resolved node input is used.
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextParams {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    #[serde(default, alias = "transform")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    data: Value,
}

fn params<T: serde::de::DeserializeOwned>(id: &str, data: Value) -> Result<T, ConductorError> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data)
        .map_err(|e| ConductorError::Config(format!("node '{}': {}", id, e)))
}

fn to_data<T: Serialize>(params: &T) -> Value {
    serde_json::to_value(params).unwrap_or(Value::Null)
}

impl TryFrom<RawNode> for Node {
    type Error = ConductorError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let id = raw.id;
        let kind = match raw.node_type.as_str() {
            "prompt" => NodeKind::Prompt(params(&id, raw.data)?),
            "llm" => NodeKind::Llm(params(&id, raw.data)?),
            "decision" => NodeKind::Decision(params(&id, raw.data)?),
            "tool" => NodeKind::Tool(params(&id, raw.data)?),
            "context_read" => NodeKind::ContextRead(params(&id, raw.data)?),
            "context_write" => NodeKind::ContextWrite(params(&id, raw.data)?),
            "input" => NodeKind::Input(params(&id, raw.data)?),
            "output" => NodeKind::Output(params(&id, raw.data)?),
            _ => NodeKind::Unknown {
                node_type: raw.node_type,
                data: raw.data,
            },
        };
        Ok(Self { id, kind })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let node_type = node.type_name().to_string();
        let data = match node.kind {
            NodeKind::Prompt(p) => to_data(&p),
            NodeKind::Llm(p) | NodeKind::Decision(p) => to_data(&p),
            NodeKind::Tool(p) => to_data(&p),
            NodeKind::ContextRead(p) | NodeKind::ContextWrite(p) => to_data(&p),
            NodeKind::Input(p) | NodeKind::Output(p) => to_data(&p),
            NodeKind::Unknown { data, .. } => data,
        };
        RawNode {
            id: node.id,
            node_type,
            data,
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn llm(id: impl Into<String>, params: LlmParams) -> Self {
        Self::new(id, NodeKind::Llm(params))
    }

    pub fn tool(id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Tool(ToolParams {
                tool_id: tool_id.into(),
                input: None,
            }),
        )
    }

    pub fn input(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Input(TransformParams::default()))
    }

    pub fn output(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Output(TransformParams::default()))
    }

    /// Attach a transform expression to an `input`/`output` node. No-op for other kinds.
    pub fn with_transform(mut self, expression: impl Into<String>) -> Self {
        if let NodeKind::Input(p) | NodeKind::Output(p) = &mut self.kind {
            p.expression = Some(expression.into());
        }
        self
    }

    /// The wire `type` tag.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            NodeKind::Prompt(_) => "prompt",
            NodeKind::Llm(_) => "llm",
            NodeKind::Decision(_) => "decision",
            NodeKind::Tool(_) => "tool",
            NodeKind::ContextRead(_) => "context_read",
            NodeKind::ContextWrite(_) => "context_write",
            NodeKind::Input(_) => "input",
            NodeKind::Output(_) => "output",
            NodeKind::Unknown { node_type, .. } => node_type,
        }
    }

    /// LLM parameters for `llm` and `decision` nodes.
    pub fn llm_params(&self) -> Option<&LlmParams> {
        match &self.kind {
            NodeKind::Llm(p) | NodeKind::Decision(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_kinds() {
        let node: Node = serde_json::from_value(json!({
            "id": "d1",
            "type": "decision",
            "data": {"llmConfigId": "fast", "toolIds": ["search"], "options": ["yes", "no"]}
        }))
        .unwrap();
        assert_eq!(node.type_name(), "decision");
        let params = node.llm_params().unwrap();
        assert_eq!(params.llm_config_id.as_deref(), Some("fast"));
        assert_eq!(params.tools, Some(vec!["search".to_string()]));

        let node: Node =
            serde_json::from_value(json!({"id": "w", "type": "context_write", "data": {"key": "k"}}))
                .unwrap();
        assert!(matches!(node.kind, NodeKind::ContextWrite(ContextParams { ref key }) if key == "k"));
    }

    #[test]
    fn unknown_type_is_kept() {
        let node: Node =
            serde_json::from_value(json!({"id": "x", "type": "webhook", "data": {"url": "u"}}))
                .unwrap();
        assert_eq!(node.type_name(), "webhook");
        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["data"]["url"], "u");
    }

    #[test]
    fn missing_data_defaults() {
        let node: Node = serde_json::from_value(json!({"id": "i", "type": "input"})).unwrap();
        assert_eq!(node, Node::input("i"));
    }

    #[test]
    fn bad_params_are_config_errors() {
        let err = serde_json::from_value::<Node>(json!({"id": "t", "type": "tool", "data": {}}))
            .unwrap_err();
        assert!(err.to_string().contains("node 't'"));
    }

    #[test]
    fn builder_sets_transform() {
        let node = Node::output("o").with_transform("{\"wrapped\": {{ $input }}}");
        assert!(matches!(
            node.kind,
            NodeKind::Output(TransformParams { expression: Some(_) })
        ));
    }
}
