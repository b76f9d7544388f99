use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> &str {
        self.addr.as_str()
    }
}

/// Known peers in insertion order. The first entry is the hub every other
/// node reports to at startup.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn with_seeds<S: AsRef<str>>(seeds: &[S]) -> Nodes {
        let nodes = Nodes::new();
        for seed in seeds {
            nodes.add_node(seed.as_ref());
        }
        nodes
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Node>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds `addr` unless it is already known. Returns whether it was new.
    pub fn add_node(&self, addr: &str) -> bool {
        let mut inner = self.write();
        if inner.iter().any(|x| x.get_addr() == addr) {
            return false;
        }
        inner.push(Node::new(addr.to_string()));
        true
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.write();
        if let Some(idx) = inner.iter().position(|x| x.get_addr() == addr) {
            inner.remove(idx);
        }
    }

    pub fn first(&self) -> Option<Node> {
        self.read().first().cloned()
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.read().to_vec()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.read().iter().any(|x| x.get_addr() == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent_and_ordered() {
        let nodes = Nodes::with_seeds(&["localhost:3000"]);
        assert!(nodes.add_node("localhost:3001"));
        assert!(!nodes.add_node("localhost:3000"));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.first().unwrap().get_addr(), "localhost:3000");
    }

    #[test]
    fn test_evict() {
        let nodes = Nodes::with_seeds(&["localhost:3000", "localhost:3001"]);
        nodes.evict_node("localhost:3000");
        nodes.evict_node("localhost:9999");
        assert!(!nodes.node_is_known("localhost:3000"));
        assert_eq!(nodes.first().unwrap().get_addr(), "localhost:3001");
        nodes.evict_node("localhost:3001");
        assert!(nodes.is_empty());
    }
}
