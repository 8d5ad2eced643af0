//! Fragment tag tree
//!
//! Tracks, per cache entry currently being produced, the tags collected for
//! it. Producing an entry inside another one (fragment caching) nests its
//! node under the outer node, and every tag added to a node also reaches the
//! node's ancestors. The outer entry is therefore invalidated whenever any
//! entry produced inside it is.
//!
//! Nodes are keyed by entry name. One session produces at most one entry per
//! name at a time; re-entrant production of the same name is not supported.

use std::collections::{BTreeSet, HashMap, HashSet};

use tagcache_core::KeyVersion;

/// One entry currently being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentNode {
    name: String,
    parent: Option<String>,
    tags: HashMap<KeyVersion, BTreeSet<String>>,
}

impl FragmentNode {
    fn new(name: &str, parent: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            tags: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the node this one was begun under.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Tags collected for `version`; empty if none.
    pub fn tags(&self, version: KeyVersion) -> BTreeSet<String> {
        self.tags.get(&version).cloned().unwrap_or_default()
    }

    fn add<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>, version: KeyVersion) {
        self.tags
            .entry(version)
            .or_default()
            .extend(tags.into_iter().cloned());
    }
}

/// Per-session tree of entries being produced.
#[derive(Debug, Default)]
pub struct FragmentTree {
    current: Option<String>,
    nodes: HashMap<String, FragmentNode>,
}

impl FragmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` the current node, creating it under the current node if absent.
    pub fn begin(&mut self, name: &str) {
        self.get_or_create(name);
        tracing::trace!(fragment = name, parent = ?self.current, "Fragment begun");
        self.current = Some(name.to_string());
    }

    /// Remove and return the node for `name`.
    ///
    /// Returns `None` for a name that was never begun. Children of the
    /// removed node are re-attached to its parent, so tags finished below it
    /// still reach the outer entries. If the removed node was current, its
    /// parent (when still present) becomes current.
    pub fn pop(&mut self, name: &str) -> Option<FragmentNode> {
        let node = self.nodes.remove(name)?;
        for child in self.nodes.values_mut() {
            if child.parent.as_deref() == Some(name) {
                child.parent = node.parent.clone();
            }
        }
        if self.current.as_deref() == Some(name) {
            self.current = node
                .parent
                .clone()
                .filter(|parent| self.nodes.contains_key(parent));
        }
        Some(node)
    }

    /// Pop the node for `name` and add `tags` to every ancestor still being produced.
    ///
    /// Finishing a name that was never begun adds nothing anywhere.
    pub fn finish<'a>(
        &mut self,
        name: &str,
        tags: impl IntoIterator<Item = &'a String>,
        version: KeyVersion,
    ) -> Option<FragmentNode> {
        let mut node = self.pop(name)?;
        let tags: Vec<&String> = tags.into_iter().collect();
        node.add(tags.iter().copied(), version);
        self.add_to_ancestors(node.parent.clone(), &tags, version);
        tracing::trace!(fragment = name, tags = tags.len(), "Fragment finished");
        Some(node)
    }

    /// Tags collected so far for `name`, creating its node under the current one if absent.
    pub fn tags_of(&mut self, name: &str, version: KeyVersion) -> BTreeSet<String> {
        self.get_or_create(name).tags(version)
    }

    /// Tags of the current node; empty when nothing is being produced.
    pub fn current_tags(&self, version: KeyVersion) -> BTreeSet<String> {
        self.current
            .as_ref()
            .and_then(|name| self.nodes.get(name))
            .map(|node| node.tags(version))
            .unwrap_or_default()
    }

    /// Name of the entry currently being produced.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.current = None;
    }

    fn get_or_create(&mut self, name: &str) -> &mut FragmentNode {
        let parent = self.current.clone();
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| FragmentNode::new(name, parent))
    }

    fn add_to_ancestors(&mut self, mut next: Option<String>, tags: &[&String], version: KeyVersion) {
        // Parent links are names, so a node recreated after its child can close a loop.
        let mut visited = HashSet::new();
        while let Some(name) = next {
            if !visited.insert(name.clone()) {
                break;
            }
            let Some(node) = self.nodes.get_mut(&name) else {
                break;
            };
            node.add(tags.iter().copied(), version);
            next = node.parent.clone();
        }
    }
}
