//! Class hierarchy index.
//!
//! A directed graph over the loaded classes with one edge from every class to its superclass
//! and to each interface it implements (or, for interfaces, extends). Built once per job and
//! read-only afterwards, so it can be shared freely across worker threads.
//!
//! Names that are referenced but not loaded have no node. Walks report them as
//! [`Lookup::Unresolved`] instead of silently stopping, so callers can decide what is safe.
//! `java/lang/Object` ends every superclass walk and is never reported.
use crate::classpath::ClassHeader;
use crate::model::{ClassModel, OBJECT};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Kind of a hierarchy edge, pointing from subtype to supertype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Extends,
    Implements,
}

/// Outcome of looking up one supertype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Resolved(&'a ClassHeader),
    /// The name is referenced but not part of the loaded class set.
    Unresolved(&'a str),
}

impl<'a> Lookup<'a> {
    pub const fn resolved(self) -> Option<&'a ClassHeader> {
        match self {
            Self::Resolved(header) => Some(header),
            Self::Unresolved(_) => None,
        }
    }

    pub fn name(self) -> &'a str {
        match self {
            Self::Resolved(header) => header.name.as_str(),
            Self::Unresolved(name) => name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    graph: DiGraph<ClassHeader, Relation>,
    nodes: HashMap<String, NodeIndex>,
}

impl HierarchyIndex {
    /// Indexes the headers of `classes`. The first class of a given name wins.
    pub fn build<'a, I>(classes: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassModel>,
    {
        Self::from_headers(classes.into_iter().map(|class| ClassHeader {
            name: class.name.clone(),
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            access: class.access,
        }))
    }

    pub fn from_headers<I>(headers: I) -> Self
    where
        I: IntoIterator<Item = ClassHeader>,
    {
        let mut index = Self::default();
        for header in headers {
            if index.nodes.contains_key(&header.name) {
                continue;
            }
            let name = header.name.clone();
            let node = index.graph.add_node(header);
            index.nodes.insert(name, node);
        }
        let nodes: Vec<NodeIndex> = index.graph.node_indices().collect();
        for node in nodes {
            let header = &index.graph[node];
            let mut edges = Vec::new();
            if let Some(parent) = header.super_name.as_deref().and_then(|s| index.nodes.get(s)) {
                edges.push((*parent, Relation::Extends));
            }
            for interface in &header.interfaces {
                if let Some(parent) = index.nodes.get(interface) {
                    edges.push((*parent, Relation::Implements));
                }
            }
            for (parent, relation) in edges {
                index.graph.add_edge(node, parent, relation);
            }
        }
        index
    }

    pub fn get(&self, name: &str) -> Option<&ClassHeader> {
        self.nodes.get(name).map(|node| &self.graph[*node])
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

    /// Superclasses of `name`, nearest first. A class that is not loaded yields itself as
    /// unresolved. Each call starts a fresh walk.
    pub fn ancestors<'a>(&'a self, name: &'a str) -> Ancestors<'a> {
        let (next, unresolved) = match self.get(name) {
            Some(header) => (header.super_name.as_deref(), None),
            None => (None, Some(name)),
        };
        Ancestors {
            index: self,
            next,
            unresolved,
            seen: HashSet::from([name]),
        }
    }

    /// Every loaded class that extends or implements `name`, directly or transitively, in
    /// breadth-first order.
    pub fn descendants<'a>(&'a self, name: &str) -> Descendants<'a> {
        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        if let Some(node) = self.nodes.get(name) {
            seen.insert(*node);
            queue.extend(self.graph.neighbors_directed(*node, Direction::Incoming));
        }
        Descendants {
            index: self,
            queue,
            seen,
        }
    }

    /// All interfaces `name` implements, through its own declarations, its superclasses and
    /// super-interfaces. Unknown interfaces are reported but not expanded further.
    pub fn interfaces<'a>(&'a self, name: &'a str) -> Vec<Lookup<'a>> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&'a str> = VecDeque::new();
        let mut owners = vec![name];
        owners.extend(self.ancestors(name).filter_map(|l| l.resolved()).map(|h| h.name.as_str()));
        for owner in owners {
            if let Some(header) = self.get(owner) {
                queue.extend(header.interfaces.iter().map(String::as_str));
            }
        }
        while let Some(interface) = queue.pop_front() {
            if !seen.insert(interface) {
                continue;
            }
            match self.get(interface) {
                Some(header) => {
                    queue.extend(header.interfaces.iter().map(String::as_str));
                    out.push(Lookup::Resolved(header));
                }
                None => out.push(Lookup::Unresolved(interface)),
            }
        }
        out
    }

    /// Whether the superclass chain and every interface of `name` are loaded.
    pub fn is_fully_resolved(&self, name: &str) -> bool {
        self.contains(name)
            && self
                .ancestors(name)
                .all(|l| matches!(l, Lookup::Resolved(_)))
            && self
                .interfaces(name)
                .iter()
                .all(|l| matches!(l, Lookup::Resolved(_)))
    }

    /// Direct supertypes of `name` that are loaded, with the edge kind.
    pub fn supertypes(&self, name: &str) -> Vec<(&ClassHeader, Relation)> {
        let Some(node) = self.nodes.get(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*node, Direction::Outgoing)
            .map(|edge| (&self.graph[edge.target()], *edge.weight()))
            .collect()
    }
}

/// Lazy superclass walk returned by [`HierarchyIndex::ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    index: &'a HierarchyIndex,
    next: Option<&'a str>,
    unresolved: Option<&'a str>,
    seen: HashSet<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = Lookup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(name) = self.unresolved.take() {
            return Some(Lookup::Unresolved(name));
        }
        let name = self.next.take()?;
        // a cycle in untrusted input ends the walk
        if name == OBJECT || !self.seen.insert(name) {
            return None;
        }
        match self.index.get(name) {
            Some(header) => {
                self.next = header.super_name.as_deref();
                Some(Lookup::Resolved(header))
            }
            None => Some(Lookup::Unresolved(name)),
        }
    }
}

/// Lazy breadth-first walk returned by [`HierarchyIndex::descendants`].
#[derive(Debug, Clone)]
pub struct Descendants<'a> {
    index: &'a HierarchyIndex,
    queue: VecDeque<NodeIndex>,
    seen: HashSet<NodeIndex>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a ClassHeader;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.queue.pop_front() {
            if !self.seen.insert(node) {
                continue;
            }
            self.queue
                .extend(self.index.graph.neighbors_directed(node, Direction::Incoming));
            return Some(&self.index.graph[node]);
        }
        None
    }
}
