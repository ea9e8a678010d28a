use serde::{Deserialize, Serialize};

use super::edge::Edge;
use super::node::Node;

/// A node-agent graph: nodes in declaration order plus the edges between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Direct predecessors of `id` in edge declaration order. Dangling sources are skipped.
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.target == id)
            .map(|e| e.source.as_str())
            .filter(move |source| self.node(source).is_some())
    }
}

/// An agent whose behavior is an internal graph of typed nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAgent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub graph: Graph,
    /// Agent-level tool ids, used by LLM nodes that do not scope their own.
    #[serde(default, alias = "toolIds")]
    pub tools: Vec<String>,
}

impl NodeAgent {
    pub fn new(id: impl Into<String>, graph: Graph) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            graph,
            tools: vec![],
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_skip_dangling_sources() {
        let graph = Graph::new(
            vec![Node::input("a"), Node::output("b")],
            vec![Edge::new("ghost", "b"), Edge::new("a", "b")],
        );
        assert_eq!(graph.predecessors("b").collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn agent_definition_from_json() {
        let agent: NodeAgent = serde_json::from_str(
            r#"{
                "id": "triage",
                "toolIds": ["search"],
                "nodes": [{"id": "in", "type": "input"}, {"id": "out", "type": "output"}],
                "edges": [{"source": "in", "target": "out"}]
            }"#,
        )
        .unwrap();
        assert_eq!(agent.tools, vec!["search"]);
        assert_eq!(agent.graph.nodes.len(), 2);
        assert_eq!(agent.graph.edges, vec![Edge::new("in", "out")]);
    }
}
