use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use conductor_core::config::{AppConfig, ModelConfig};
use conductor_core::error::{ConductorError, Result};
use conductor_core::event::EventBus;
use conductor_core::traits::{LlmClient, ToolExecutor};
use conductor_core::types::{AgentEvent, ChatMessage};

use super::agent::NodeAgent;
use super::context::SharedContext;
use super::node::{LlmParams, Node, NodeKind, PromptParams, ToolParams};
use super::order::{execution_order, latest_predecessor, positions};
use super::prompt::PromptStore;
use super::transform::{apply_transform, value_text, INPUT_TOKEN};

/// Outcome of one node-agent execution.
#[derive(Debug, Clone)]
pub struct GraphRun {
    /// Output of the last node in execution order, or the input for an empty graph.
    pub output: Value,
    /// Node ids in the order they ran.
    pub order: Vec<String>,
    /// Every node's output keyed by node id.
    pub outputs: HashMap<String, Value>,
}

/// Runs node-agent graphs.
///
/// Nodes run one at a time in topological order. Each node's input is the
/// output of its latest-running direct predecessor, or the run's input when it
/// has none. `llm` and `decision` nodes drive a bounded LLM-with-tools loop.
pub struct NodeAgentExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
    prompts: PromptStore,
    config: AppConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl NodeAgentExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolExecutor>, config: AppConfig) -> Self {
        Self {
            llm,
            tools,
            prompts: PromptStore::new(),
            config,
            event_bus: None,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptStore) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: AgentEvent) {
        if let Some(ref bus) = self.event_bus {
            bus.publish(event);
        }
    }

    /// Execute `agent` on `input`, returning the last node's output.
    pub async fn execute(
        &self,
        agent: &NodeAgent,
        input: Value,
        context: &mut SharedContext,
    ) -> Result<Value> {
        Ok(self.run(agent, input, context).await?.output)
    }

    /// Execute `agent` and keep every node's output.
    pub async fn run(
        &self,
        agent: &NodeAgent,
        input: Value,
        context: &mut SharedContext,
    ) -> Result<GraphRun> {
        let graph = &agent.graph;
        let order = execution_order(graph);
        let position = positions(&order);
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut last_output = None;

        info!(agent = %agent.id, nodes = order.len(), "Executing node agent");

        for id in &order {
            let Some(node) = graph.node(id) else { continue };
            let predecessor =
                latest_predecessor(graph, id, &position).and_then(|p| graph.node(p));
            let node_input = predecessor
                .and_then(|p| outputs.get(&p.id))
                .cloned()
                .unwrap_or_else(|| input.clone());

            self.publish(AgentEvent::NodeStarted {
                node_id: node.id.clone(),
                node_type: node.type_name().to_string(),
            });
            debug!(node_id = %node.id, node_type = node.type_name(), "Running node");

            let output = self
                .run_node(agent, node, predecessor, node_input, context)
                .await?;

            self.publish(AgentEvent::NodeCompleted {
                node_id: node.id.clone(),
            });
            outputs.insert(node.id.clone(), output.clone());
            last_output = Some(output);
        }

        Ok(GraphRun {
            output: last_output.unwrap_or(input),
            order,
            outputs,
        })
    }

    async fn run_node(
        &self,
        agent: &NodeAgent,
        node: &Node,
        predecessor: Option<&Node>,
        input: Value,
        context: &mut SharedContext,
    ) -> Result<Value> {
        match &node.kind {
            NodeKind::Prompt(params) => self.run_prompt(params, &input).await,
            NodeKind::Llm(params) => {
                let model = self.model(params.llm_config_id.as_deref())?;
                let text = self
                    .run_llm(&model, params, &effective_tools(agent, params), &input, false)
                    .await?;
                Ok(Value::String(text))
            }
            NodeKind::Decision(params) => {
                let config_id = params.llm_config_id.as_deref().ok_or_else(|| {
                    ConductorError::MissingDependency(format!(
                        "decision node '{}' has no llm_config_id",
                        node.id
                    ))
                })?;
                let model = self.model(Some(config_id))?;
                let text = self
                    .run_llm(&model, params, &effective_tools(agent, params), &input, true)
                    .await?;
                Ok(Value::String(text))
            }
            NodeKind::Tool(params) => self.run_tool(agent, node, params, predecessor, input).await,
            NodeKind::ContextRead(params) => {
                Ok(context.get(&params.key).cloned().unwrap_or(Value::Null))
            }
            NodeKind::ContextWrite(params) => {
                context.set(params.key.clone(), input.clone());
                Ok(input)
            }
            NodeKind::Input(params) | NodeKind::Output(params) => {
                Ok(apply_transform(params.expression.as_deref(), &input))
            }
            NodeKind::Unknown { node_type, .. } => {
                debug!(
                    node_id = %node.id,
                    node_type = %node_type,
                    "Unknown node type, passing input through"
                );
                Ok(input)
            }
        }
    }

    /// Resolve a named model config, or the default model when `id` is `None`.
    fn model(&self, id: Option<&str>) -> Result<ModelConfig> {
        match id {
            None => Ok(self.config.model.clone()),
            Some(id) => self.config.model_by_id(id).cloned().ok_or_else(|| {
                ConductorError::MissingDependency(format!("LLM config '{}' not found", id))
            }),
        }
    }

    async fn run_prompt(&self, params: &PromptParams, input: &Value) -> Result<Value> {
        let template = self.prompts.get(&params.prompt_id)?;
        let text = template
            .render(&params.arguments)?
            .replace(INPUT_TOKEN, &value_text(input));
        let model = self.model(params.llm_config_id.as_deref())?;

        let response = self.llm.chat(model.request(vec![ChatMessage::user(text)])).await?;
        Ok(Value::String(response.content))
    }

    async fn run_llm(
        &self,
        model: &ModelConfig,
        params: &LlmParams,
        tool_ids: &[String],
        input: &Value,
        decision: bool,
    ) -> Result<String> {
        let mut messages = Vec::new();

        let mut system = params.system_prompt.clone().unwrap_or_default();
        if decision && !params.options.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&format!(
                "Respond with exactly one of: {}",
                params.options.join(", ")
            ));
        }
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }

        let body = match &params.user_prompt {
            Some(template) => template.replace(INPUT_TOKEN, &value_text(input)),
            None => value_text(input),
        };
        let content = match params.context.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => {
                format!("## Context\n\n{}\n\n---\n\n{}", prefix, body)
            }
            _ => body,
        };
        messages.push(ChatMessage::user(content));

        self.tool_loop(model, messages, tool_ids).await
    }

    /// Call the LLM until it answers without tool calls, executing requested tools in between.
    ///
    /// Bounded by `node_agent.max_tool_rounds`. On exhaustion the last message's
    /// content is returned as a best-effort result.
    async fn tool_loop(
        &self,
        model: &ModelConfig,
        mut messages: Vec<ChatMessage>,
        tool_ids: &[String],
    ) -> Result<String> {
        let definitions = if tool_ids.is_empty() {
            vec![]
        } else {
            self.tools.definitions(tool_ids)
        };
        let max_rounds = self.config.node_agent.max_tool_rounds;

        for round in 0..max_rounds {
            let mut request = model.request(messages.clone());
            request.tools = definitions.clone();
            let response = self.llm.chat(request).await?;

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            debug!(round, calls = response.tool_calls.len(), "Executing node tool calls");
            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = self.tools.execute(&call.name, call.parsed_arguments()).await?;
                messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
            }
        }

        warn!(max_rounds, "Node tool loop exhausted, returning last message");
        Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
    }

    async fn run_tool(
        &self,
        agent: &NodeAgent,
        node: &Node,
        params: &ToolParams,
        predecessor: Option<&Node>,
        input: Value,
    ) -> Result<Value> {
        let already_offered = predecessor
            .and_then(|p| p.llm_params())
            .is_some_and(|p| effective_tools(agent, p).contains(&params.tool_id));
        if already_offered {
            debug!(
                node_id = %node.id,
                tool = %params.tool_id,
                "Tool already offered to the preceding LLM node, passing through"
            );
            return Ok(input);
        }

        let args = params.input.clone().unwrap_or(input);
        self.tools.execute(&params.tool_id, args).await
    }
}

/// Tool ids an `llm`/`decision` node may call: its own list, else the agent's.
fn effective_tools(agent: &NodeAgent, params: &LlmParams) -> Vec<String> {
    params.tools.clone().unwrap_or_else(|| agent.tools.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Graph, PromptTemplate};
    use conductor_core::types::{LlmResponse, ToolCall};
    use conductor_test_utils::{RecordingTools, ScriptedClient};
    use serde_json::json;

    fn executor(llm: Arc<ScriptedClient>, tools: Arc<RecordingTools>) -> NodeAgentExecutor {
        let mut config = AppConfig::default();
        config.models.insert(
            "fast".into(),
            ModelConfig {
                model_id: "fast-model".into(),
                ..Default::default()
            },
        );
        NodeAgentExecutor::new(llm, tools, config)
    }

    fn node(value: Value) -> Node {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn latest_predecessor_output_feeds_fan_in() {
        let graph = Graph::new(
            vec![
                Node::input("a").with_transform("\"from a\""),
                Node::input("b").with_transform("\"from b\""),
                Node::output("c"),
            ],
            vec![Edge::new("b", "c"), Edge::new("a", "c"), Edge::new("a", "b")],
        );
        let agent = NodeAgent::new("fan-in", graph);
        let exec = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()));

        let run = exec
            .run(&agent, json!("start"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(run.order, vec!["a", "b", "c"]);
        assert_eq!(run.output, json!("from b"));
    }

    #[tokio::test]
    async fn empty_graph_returns_input() {
        let exec = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()));
        let out = exec
            .execute(&NodeAgent::default(), json!({"x": 1}), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn context_nodes_read_and_write() {
        let graph = Graph::new(
            vec![
                node(json!({"id": "w", "type": "context_write", "data": {"key": "topic"}})),
                node(json!({"id": "r", "type": "context_read", "data": {"key": "seen"}})),
            ],
            vec![Edge::new("w", "r")],
        );
        let exec = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()));
        let mut context = SharedContext::new();
        context.set("seen", json!("earlier"));

        let run = exec
            .run(&NodeAgent::new("ctx", graph), json!("rust"), &mut context)
            .await
            .unwrap();
        assert_eq!(run.outputs["w"], json!("rust"));
        assert_eq!(run.output, json!("earlier"));
        assert_eq!(context.get("topic"), Some(&json!("rust")));
    }

    #[tokio::test]
    async fn llm_node_runs_tool_loop() {
        let llm = Arc::new(ScriptedClient::new(vec![
            LlmResponse::with_tool_calls("", vec![ToolCall::new("search", r#"{"q":"tokio"}"#)]),
            LlmResponse::text("tokio is a runtime"),
        ]));
        let tools = Arc::new(RecordingTools::new().with_result("search", json!({"hits": 3})));
        let graph = Graph::new(
            vec![node(json!({
                "id": "think",
                "type": "llm",
                "data": {"systemPrompt": "Be brief.", "userPrompt": "Explain {{ $input }}"}
            }))],
            vec![],
        );
        let agent = NodeAgent::new("researcher", graph).with_tools(vec!["search".into()]);

        let out = executor(llm.clone(), tools.clone())
            .execute(&agent, json!("tokio"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!("tokio is a runtime"));
        assert_eq!(tools.calls(), vec![("search".to_string(), json!({"q": "tokio"}))]);

        let requests = llm.requests();
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].messages[1].content, "Explain tokio");
        // system, user, assistant with call, tool result
        assert_eq!(requests[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn tool_loop_exhaustion_returns_last_message() {
        let call = || LlmResponse::with_tool_calls("", vec![ToolCall::new("search", "{}")]);
        let llm = Arc::new(ScriptedClient::new(vec![call(), call(), call()]));
        let tools = Arc::new(RecordingTools::new().with_result("search", json!("last result")));
        let mut exec = executor(llm.clone(), tools);
        exec.config.node_agent.max_tool_rounds = 3;

        let graph = Graph::new(vec![Node::llm("l", LlmParams::default())], vec![]);
        let out = exec
            .execute(&NodeAgent::new("a", graph), json!("go"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!("\"last result\""));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn decision_without_config_id_is_missing_dependency() {
        let graph = Graph::new(vec![node(json!({"id": "d", "type": "decision"}))], vec![]);
        let exec = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()));
        let err = exec
            .execute(&NodeAgent::new("a", graph), json!("x"), &mut SharedContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::MissingDependency(_)));
    }

    #[tokio::test]
    async fn decision_uses_named_model_and_options() {
        let llm = Arc::new(ScriptedClient::from_texts(["approve"]));
        let graph = Graph::new(
            vec![node(json!({
                "id": "d",
                "type": "decision",
                "data": {"llmConfigId": "fast", "options": ["approve", "reject"]}
            }))],
            vec![],
        );
        let exec = executor(llm.clone(), Arc::new(RecordingTools::new()));
        let out = exec
            .execute(&NodeAgent::new("a", graph), json!("PR #1"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!("approve"));
        let requests = llm.requests();
        let request = &requests[0];
        assert_eq!(request.model, "fast-model");
        assert!(request.messages[0].content.contains("approve, reject"));
    }

    #[tokio::test]
    async fn tool_after_llm_that_offered_it_passes_through() {
        let llm = Arc::new(ScriptedClient::from_texts(["answer"]));
        let tools = Arc::new(RecordingTools::new());
        let graph = Graph::new(
            vec![
                node(json!({"id": "l", "type": "llm", "data": {"tools": ["search"]}})),
                Node::tool("t", "search"),
            ],
            vec![Edge::new("l", "t")],
        );
        let out = executor(llm, tools.clone())
            .execute(&NodeAgent::new("a", graph), json!("q"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!("answer"));
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn standalone_tool_node_invokes_tool() {
        let tools = Arc::new(RecordingTools::new().with_result("fetch", json!({"ok": true})));
        let graph = Graph::new(
            vec![Node::input("in"), Node::tool("t", "fetch")],
            vec![Edge::new("in", "t")],
        );
        let out = executor(Arc::new(ScriptedClient::default()), tools.clone())
            .execute(&NodeAgent::new("a", graph), json!({"url": "u"}), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"ok": true}));
        assert_eq!(tools.calls(), vec![("fetch".to_string(), json!({"url": "u"}))]);
    }

    #[tokio::test]
    async fn tool_errors_propagate() {
        let tools = Arc::new(RecordingTools::new().with_error("fetch", "boom"));
        let graph = Graph::new(vec![Node::tool("t", "fetch")], vec![]);
        let err = executor(Arc::new(ScriptedClient::default()), tools)
            .execute(&NodeAgent::new("a", graph), json!({}), &mut SharedContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn prompt_node_renders_template() {
        let llm = Arc::new(ScriptedClient::from_texts(["summary"]));
        let prompts = PromptStore::new().with(
            PromptTemplate::new("sum", "Summarize {{topic}}: {{ $input }}")
                .with_argument("topic", true),
        );
        let graph = Graph::new(
            vec![node(json!({
                "id": "p",
                "type": "prompt",
                "data": {"promptId": "sum", "arguments": {"topic": "logs"}}
            }))],
            vec![],
        );
        let out = executor(llm.clone(), Arc::new(RecordingTools::new()))
            .with_prompts(prompts)
            .execute(&NodeAgent::new("a", graph), json!("line 1"), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!("summary"));
        assert_eq!(llm.requests()[0].messages[0].content, "Summarize logs: line 1");
    }

    #[tokio::test]
    async fn unknown_prompt_fails() {
        let graph = Graph::new(
            vec![node(json!({"id": "p", "type": "prompt", "data": {"promptId": "ghost"}}))],
            vec![],
        );
        let err = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()))
            .execute(&NodeAgent::new("a", graph), json!(""), &mut SharedContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::PromptNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_node_type_passes_through_and_emits_events() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let graph = Graph::new(
            vec![node(json!({"id": "x", "type": "webhook", "data": {}}))],
            vec![],
        );
        let out = executor(Arc::new(ScriptedClient::default()), Arc::new(RecordingTools::new()))
            .with_event_bus(bus)
            .execute(&NodeAgent::new("a", graph), json!(7), &mut SharedContext::new())
            .await
            .unwrap();
        assert_eq!(out, json!(7));
        assert!(matches!(
            rx.try_recv(),
            Ok(AgentEvent::NodeStarted { ref node_type, .. }) if node_type == "webhook"
        ));
        assert!(matches!(rx.try_recv(), Ok(AgentEvent::NodeCompleted { .. })));
    }
}
