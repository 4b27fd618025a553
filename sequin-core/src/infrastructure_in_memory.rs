use crate::error::CoordResult;
use crate::infrastructure::NodeStore;
use crate::types::{join, Node};
use std::collections::BTreeMap;

pub struct InMemoryNodeStore {
    // Map of path -> node. Ordered so a parent's children are a contiguous range.
    nodes: BTreeMap<String, Node>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::root());
        Self { nodes }
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn get(&self, path: &str) -> CoordResult<Option<Node>> {
        Ok(self.nodes.get(path).cloned())
    }

    fn put(&mut self, node: Node) -> CoordResult<()> {
        self.nodes.insert(node.path.clone(), node);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> CoordResult<Option<Node>> {
        Ok(self.nodes.remove(path))
    }

    fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let prefix = join(path, "");
        let names = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .map(|(p, _)| &p[prefix.len()..])
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();
        Ok(names)
    }

    fn ephemeral_paths(&self) -> CoordResult<Vec<String>> {
        Ok(self
            .nodes
            .values()
            .filter(|n| n.is_ephemeral())
            .map(|n| n.path.clone())
            .collect())
    }

    fn count(&self) -> CoordResult<usize> {
        Ok(self.nodes.len())
    }
}
