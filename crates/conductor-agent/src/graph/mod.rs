//! Node-agent graph execution.
//!
//! A node agent is a directed graph of typed nodes (`prompt`, `llm`,
//! `decision`, `tool`, `context_read`, `context_write`, `input`, `output`).
//! The `NodeAgentExecutor` runs the nodes in topological order, feeding each
//! node the output of its latest-running predecessor, and returns the last
//! node's output.

pub mod agent;
pub mod context;
pub mod edge;
pub mod executor;
pub mod node;
pub mod order;
pub mod prompt;
pub mod transform;

pub use agent::{Graph, NodeAgent};
pub use context::SharedContext;
pub use edge::Edge;
pub use executor::{GraphRun, NodeAgentExecutor};
pub use node::{
    ContextParams, LlmParams, Node, NodeKind, PromptParams, ToolParams, TransformParams,
};
pub use order::execution_order;
pub use prompt::{PromptArgument, PromptStore, PromptTemplate};
pub use transform::apply_transform;
