//! Composition graph: node registration, cycle detection, and planning.
//!
//! Dependency edges are never declared by hand. They are derived from the
//! origins of each node's inputs plus its explicit `after` list, so a node
//! can only run once every value it reads has a producer that ran first.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use strata_common::error::{Result, StrataError};
use strata_common::types::NodeId;

use crate::node::{Input, ResourceNode};

/// Nodes registered for one deployment.
#[derive(Debug, Default)]
pub struct CompositionGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<NodeId, usize>,
}

impl CompositionGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::DuplicateIdentity`] if the identity is taken,
    /// or [`StrataError::CyclicDependency`] if the node closes a cycle with
    /// nodes already registered. On error the graph is left unchanged.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.index.contains_key(node.id()) {
            return Err(StrataError::DuplicateIdentity {
                id: node.id().to_string(),
            });
        }
        if let Some(cycle) = self.cycle_through(&node) {
            return Err(StrataError::CyclicDependency { cycle });
        }
        tracing::debug!(node = %node.id(), kind = %node.kind(), "node registered");
        let _ = self.index.insert(node.id().clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Finds a path from `node` back to itself through registered nodes.
    fn cycle_through(&self, node: &ResourceNode) -> Option<Vec<String>> {
        let start = node.id();
        let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<(NodeId, BTreeSet<NodeId>)> = VecDeque::new();
        queue.push_back((start.clone(), node.dependencies()));

        while let Some((current, deps)) = queue.pop_front() {
            for dep in deps {
                if &dep == start {
                    let mut path = vec![current.to_string()];
                    let mut cursor = &current;
                    while let Some(prev) = came_from.get(cursor) {
                        path.push(prev.to_string());
                        cursor = prev;
                    }
                    path.reverse();
                    path.push(start.to_string());
                    return Some(path);
                }
                let Some(&position) = self.index.get(&dep) else {
                    continue;
                };
                if visited.insert(dep.clone()) {
                    let _ = came_from.insert(dep.clone(), current.clone());
                    queue.push_back((dep, self.nodes[position].dependencies()));
                }
            }
        }
        None
    }

    /// Returns a registered node.
    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns whether a node is registered.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Registered nodes in registration order.
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validates the graph and computes a deterministic execution plan.
    ///
    /// Ties between independent nodes are broken by registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::UnknownDependency`] if a node references an
    /// unregistered node, [`StrataError::UnboundValue`] if an input has no
    /// producer and is still pending, or [`StrataError::CyclicDependency`]
    /// if the dependency or parent relations contain a cycle.
    pub fn build(self) -> Result<ExecutionPlan> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        for i in 0..self.nodes.len() {
            let _ = graph.add_node(i);
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            check_inputs(node)?;
            let mut node_deps = Vec::new();
            for dep in node.dependencies() {
                let &d = self
                    .index
                    .get(&dep)
                    .ok_or_else(|| StrataError::UnknownDependency {
                        node: node.id().to_string(),
                        dependency: dep.to_string(),
                    })?;
                let _ = graph.add_edge(NodeIndex::new(d), NodeIndex::new(i), ());
                node_deps.push(d);
            }
            if let Some(parent) = node.parent() {
                if !self.index.contains_key(parent) {
                    return Err(StrataError::UnknownDependency {
                        node: node.id().to_string(),
                        dependency: parent.to_string(),
                    });
                }
            }
            deps.push(node_deps);
        }

        let order = prioritized_toposort(&graph, |i| i).map_err(|left| self.cycle_error(&graph, &left))?;

        let mut position = vec![0; self.nodes.len()];
        for (p, &i) in order.iter().enumerate() {
            position[i] = p;
        }

        // Teardown: dependents before their dependencies, children before parents.
        let mut teardown_graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        for i in 0..self.nodes.len() {
            let _ = teardown_graph.add_node(i);
        }
        for (i, node_deps) in deps.iter().enumerate() {
            for &d in node_deps {
                let _ = teardown_graph.add_edge(NodeIndex::new(i), NodeIndex::new(d), ());
            }
            if let Some(parent) = self.nodes[i].parent() {
                let p = self.index[parent];
                let _ = teardown_graph.add_edge(NodeIndex::new(i), NodeIndex::new(p), ());
            }
        }
        let teardown = prioritized_toposort(&teardown_graph, |i| usize::MAX - position[i])
            .map_err(|left| self.cycle_error(&teardown_graph, &left))?;

        Ok(ExecutionPlan::assemble(self.nodes, &order, &deps, &teardown))
    }

    fn cycle_error(&self, graph: &DiGraph<usize, ()>, left: &[usize]) -> StrataError {
        let left: HashSet<usize> = left.iter().copied().collect();
        let cycle = petgraph::algo::tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.iter().all(|n| left.contains(&n.index())))
            .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|mut scc| {
                scc.sort_unstable();
                let mut names: Vec<String> = scc
                    .iter()
                    .map(|n| self.nodes[n.index()].id().to_string())
                    .collect();
                if let Some(first) = names.first().cloned() {
                    names.push(first);
                }
                names
            })
            .unwrap_or_default();
        StrataError::CyclicDependency { cycle }
    }
}

/// Rejects pending inputs that no node will ever produce.
fn check_inputs(node: &ResourceNode) -> Result<()> {
    for (_, input) in node.inputs() {
        if let Input::Deferred(value) = input {
            if value.origins().is_empty() && value.is_pending() {
                return Err(StrataError::UnboundValue {
                    node: node.id().to_string(),
                    value: value.label().to_owned(),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm, always taking the ready node with the smallest priority.
///
/// Returns the nodes that could not be ordered on failure.
fn prioritized_toposort(
    graph: &DiGraph<usize, ()>,
    priority: impl Fn(usize) -> usize,
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| Reverse((priority(n.index()), n.index())))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for next in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse((priority(next.index()), next.index())));
            }
        }
    }

    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        let done: HashSet<usize> = order.iter().copied().collect();
        Err((0..in_degree.len()).filter(|i| !done.contains(i)).collect())
    }
}

/// A validated, ordered graph ready for execution.
///
/// Indices used by the accessors below are plan positions.
#[derive(Debug)]
pub struct ExecutionPlan {
    nodes: Vec<Arc<ResourceNode>>,
    position: HashMap<NodeId, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    teardown: Vec<usize>,
}

impl ExecutionPlan {
    fn assemble(
        nodes: Vec<ResourceNode>,
        order: &[usize],
        deps: &[Vec<usize>],
        teardown: &[usize],
    ) -> Self {
        let mut position = vec![0; nodes.len()];
        for (p, &i) in order.iter().enumerate() {
            position[i] = p;
        }
        let mut slots: Vec<Option<ResourceNode>> = nodes.into_iter().map(Some).collect();
        let nodes: Vec<Arc<ResourceNode>> = order
            .iter()
            .filter_map(|&i| slots[i].take().map(Arc::new))
            .collect();
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(p, n)| (n.id().clone(), p))
            .collect();

        let mut plan_deps = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node_deps) in deps.iter().enumerate() {
            let p = position[i];
            let mut mapped: Vec<usize> = node_deps.iter().map(|&d| position[d]).collect();
            mapped.sort_unstable();
            for &d in &mapped {
                dependents[d].push(p);
            }
            plan_deps[p] = mapped;
        }
        for list in &mut dependents {
            list.sort_unstable();
        }

        let mut children = vec![Vec::new(); nodes.len()];
        for (p, node) in nodes.iter().enumerate() {
            if let Some(parent) = node.parent() {
                children[index[parent]].push(p);
            }
        }

        Self {
            teardown: teardown.iter().map(|&i| position[i]).collect(),
            nodes,
            position: index,
            deps: plan_deps,
            dependents,
            children,
        }
    }

    /// Nodes in execution order.
    pub fn nodes(&self) -> &[Arc<ResourceNode>] {
        &self.nodes
    }

    /// Node identities in execution order.
    pub fn order(&self) -> Vec<&NodeId> {
        self.nodes.iter().map(|n| n.id()).collect()
    }

    /// Node identities in teardown order.
    pub fn teardown_order(&self) -> Vec<&NodeId> {
        self.teardown.iter().map(|&p| self.nodes[p].id()).collect()
    }

    /// Looks up a node.
    pub fn node(&self, id: &NodeId) -> Option<&Arc<ResourceNode>> {
        self.position.get(id).map(|&p| &self.nodes[p])
    }

    /// Plan position of a node.
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.position.get(id).copied()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.related(id, &self.deps)
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.related(id, &self.dependents)
    }

    /// Nodes declaring this node as their parent scope.
    pub fn children_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.related(id, &self.children)
    }

    /// Every node that directly or transitively depends on a node.
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.position.get(id) else {
            return found;
        };
        let mut stack = vec![start];
        while let Some(p) = stack.pop() {
            for &d in &self.dependents[p] {
                if found.insert(self.nodes[d].id().clone()) {
                    stack.push(d);
                }
            }
        }
        found
    }

    fn related<'a>(&'a self, id: &NodeId, table: &'a [Vec<usize>]) -> Vec<&'a NodeId> {
        self.position
            .get(id)
            .map(|&p| table[p].iter().map(|&q| self.nodes[q].id()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn dependency_positions(&self, position: usize) -> &[usize] {
        &self.deps[position]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
