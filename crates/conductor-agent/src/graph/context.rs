use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Caller-owned key/value store shared by the nodes of a run.
///
/// `context_write` nodes set keys and `context_read` nodes read them. The same
/// context may be reused across several executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    data: HashMap<String, serde_json::Value>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: HashMap<String, serde_json::Value>) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Merge another context into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &SharedContext) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites() {
        let mut a = SharedContext::new();
        a.set("k", serde_json::json!(1));
        a.set("keep", serde_json::json!(true));
        let mut b = SharedContext::new();
        b.set("k", serde_json::json!(2));
        a.merge(&b);
        assert_eq!(a.get("k"), Some(&serde_json::json!(2)));
        assert_eq!(a.get("keep"), Some(&serde_json::json!(true)));
    }
}
