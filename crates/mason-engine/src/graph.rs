//! Dependency graph construction.
//!
//! Recursive resolver from requested targets to a DAG. Nodes are
//! memoized by canonical name, cycles are detected on the resolution
//! stack and reported with the full path. The graph is read-only once
//! the scheduler starts; execution state lives on the scheduler side.

use std::collections::HashMap;
use std::path::Path;

use mason_core::{Binding, Error, Registry, Result};
use tracing::debug;

pub type NodeId = usize;

#[derive(Debug)]
pub struct Node {
    /// Canonical target name.
    pub name: String,
    /// Bound rule, absent for leaf source files and virtual resources.
    pub binding: Option<Binding>,
    pub depends: Vec<NodeId>,
    pub uses: Vec<NodeId>,
    /// Registered check index when this is a virtual resource.
    pub check: Option<usize>,
    /// Output existence is verified after a successful build. Set for
    /// roots and for anything reachable through a `depends` edge;
    /// `uses`-only prerequisites may legitimately produce nothing.
    pub requires_output: bool,
    /// 1 + max child level; drives dispatch ordering.
    pub level: usize,
    /// Registration ordinal of the bound rule, for dispatch tie-breaks.
    pub ordinal: usize,
}

impl Node {
    pub fn is_virtual(&self) -> bool {
        self.check.is_some()
    }

    pub fn is_source(&self) -> bool {
        self.binding.is_none() && self.check.is_none()
    }
}

/// Lexical path normalization: `./foo` and `foo` memoize identically.
/// Never touches the filesystem. Virtual resource names (anything with
/// a scheme separator) pass through untouched.
pub fn canonicalize(name: &str) -> String {
    if name.contains("://") {
        return name.to_string();
    }
    let trailing_slash = name.len() > 1 && name.ends_with('/');
    let absolute = name.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in name.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&p) if p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&parts.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.index.get(&canonicalize(name)).copied()
    }

    /// Resolve `target` and everything below it, then record it as a
    /// root. Safe to call again for deferred builds; already-resolved
    /// subgraphs are shared through the memo table.
    pub fn add_root(&mut self, registry: &Registry, target: &str) -> Result<NodeId> {
        let mut stack = Vec::new();
        let id = self.resolve(registry, &canonicalize(target), &mut stack)?;
        self.nodes[id].requires_output = true;
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        Ok(id)
    }

    fn resolve(
        &mut self,
        registry: &Registry,
        name: &str,
        stack: &mut Vec<String>,
    ) -> Result<NodeId> {
        // Nodes are memoized only after their subtree resolves, so an
        // on-stack name is never in the index; check the stack first.
        if stack.iter().any(|s| s == name) {
            return Err(self.cycle_error(name, stack));
        }
        if let Some(&id) = self.index.get(name) {
            return Ok(id);
        }

        // Virtual resources are terminal: staleness comes from the probe.
        if let Some((check_idx, _)) = registry.find_check(name) {
            debug!(name, check = check_idx, "virtual node");
            return Ok(self.insert(Node {
                name: name.to_string(),
                binding: None,
                depends: Vec::new(),
                uses: Vec::new(),
                check: Some(check_idx),
                requires_output: false,
                level: 0,
                ordinal: usize::MAX,
            }));
        }

        let binding = registry.select(name)?;
        let Some(binding) = binding else {
            if Path::new(name).exists() {
                debug!(name, "leaf source file");
                return Ok(self.insert(Node {
                    name: name.to_string(),
                    binding: None,
                    depends: Vec::new(),
                    uses: Vec::new(),
                    check: None,
                    requires_output: false,
                    level: 0,
                    ordinal: usize::MAX,
                }));
            }
            return Err(Error::NoRuleForTarget {
                target: name.to_string(),
            });
        };

        stack.push(name.to_string());
        let mut depends = Vec::with_capacity(binding.depends.len());
        for dep in &binding.depends {
            let child = self.resolve(registry, &canonicalize(dep), stack)?;
            self.nodes[child].requires_output = true;
            depends.push(child);
        }
        let mut uses = Vec::with_capacity(binding.uses.len());
        for dep in &binding.uses {
            uses.push(self.resolve(registry, &canonicalize(dep), stack)?);
        }
        stack.pop();

        let level = depends
            .iter()
            .chain(uses.iter())
            .map(|&c| self.nodes[c].level + 1)
            .max()
            .unwrap_or(0);
        let ordinal = binding.rule;
        Ok(self.insert(Node {
            name: name.to_string(),
            binding: Some(binding),
            depends,
            uses,
            check: None,
            requires_output: false,
            level,
            ordinal,
        }))
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.index.insert(node.name.clone(), id);
        self.nodes.push(node);
        id
    }

    fn cycle_error(&self, name: &str, stack: &[String]) -> Error {
        let start = stack.iter().position(|s| s == name).unwrap_or(0);
        let mut path: Vec<String> = stack[start..].to_vec();
        path.push(name.to_string());
        Error::CycleDetected { path }
    }

    /// Parents of each node across both edge kinds, for failure
    /// propagation. Built on demand; the graph stores child edges only.
    pub fn parent_map(&self) -> Vec<Vec<NodeId>> {
        let mut parents = vec![Vec::new(); self.nodes.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            for &c in node.depends.iter().chain(node.uses.iter()) {
                parents[c].push(id);
            }
        }
        parents
    }
}
