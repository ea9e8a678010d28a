use serde::{Deserialize, Serialize};

/// A directed edge between two nodes of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    #[serde(alias = "from")]
    pub source: String,
    /// Target node id.
    #[serde(alias = "to")]
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}
