use crate::error::{ConfigError, Error, Result};
use crate::types::{NodeId, Workflow, WorkflowNode};
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validated, read-only DAG view over a workflow
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, WorkflowNode>,
    /// Node IDs in declaration order
    declared: Vec<NodeId>,
    /// node ID -> IDs of the nodes that list it as an input
    dependents: HashMap<NodeId, Vec<NodeId>>,
    entry_point: NodeId,
}

impl Graph {
    /// Build a graph from a workflow definition
    pub fn build(workflow: &Workflow) -> Result<Self, ConfigError> {
        let mut nodes = HashMap::with_capacity(workflow.nodes.len());
        let mut declared = Vec::with_capacity(workflow.nodes.len());

        // Index all nodes
        for node in &workflow.nodes {
            if nodes.insert(node.id.clone(), node.clone()).is_some() {
                return Err(ConfigError::DuplicateNode(node.id.clone()));
            }
            declared.push(node.id.clone());
        }

        if !nodes.contains_key(&workflow.entry_point) {
            return Err(ConfigError::EntryPointNotFound(workflow.entry_point.clone()));
        }

        // Record the inverse of every declared input
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in &workflow.nodes {
            let mut seen = HashSet::with_capacity(node.inputs.len());
            for input in &node.inputs {
                if !nodes.contains_key(input) {
                    return Err(ConfigError::DanglingInput {
                        node: node.id.clone(),
                        input: input.clone(),
                    });
                }
                if !seen.insert(input) {
                    return Err(ConfigError::DuplicateInput {
                        node: node.id.clone(),
                        input: input.clone(),
                    });
                }
                dependents
                    .entry(input.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        Ok(Self {
            nodes,
            declared,
            dependents,
            entry_point: workflow.entry_point.clone(),
        })
    }

    /// Node IDs in execution order (dependencies first).
    ///
    /// Kahn's algorithm with a FIFO queue seeded in declaration order, so the
    /// result is stable across calls and processes.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: HashMap<&NodeId, usize> =
            self.declared.iter().map(|id| (id, 0)).collect();
        for targets in self.dependents.values() {
            for target in targets {
                *in_degree.entry(target).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&NodeId> = self
            .declared
            .iter()
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();

        let mut order = Vec::with_capacity(self.declared.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.clone());

            for next in self.dependents(current) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.declared.len() {
            return Err(Error::Cycle {
                nodes: self.cycle_members(&order),
            });
        }

        Ok(order)
    }

    /// Nodes that sit on a cycle, among those Kahn's algorithm could not order
    fn cycle_members(&self, resolved: &[NodeId]) -> Vec<NodeId> {
        let resolved: HashSet<&NodeId> = resolved.iter().collect();
        let unresolved: Vec<&NodeId> = self
            .declared
            .iter()
            .filter(|id| !resolved.contains(id))
            .collect();

        let mut graph = DiGraph::<&NodeId, ()>::new();
        let indices: HashMap<&NodeId, _> = unresolved
            .iter()
            .map(|id| (*id, graph.add_node(*id)))
            .collect();

        for id in &unresolved {
            for next in self.dependents(id) {
                if let Some(target) = indices.get(next) {
                    graph.add_edge(indices[id], *target, ());
                }
            }
        }

        let on_cycle: HashSet<&NodeId> = petgraph::algo::tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .flatten()
            .map(|idx| graph[idx])
            .collect();

        if on_cycle.is_empty() {
            return unresolved.into_iter().cloned().collect();
        }

        unresolved
            .into_iter()
            .filter(|id| on_cycle.contains(id))
            .cloned()
            .collect()
    }

    /// Get a node by ID
    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    /// Get the declared inputs of a node
    pub fn dependencies(&self, id: &NodeId) -> Result<&[NodeId]> {
        self.nodes
            .get(id)
            .map(|node| node.inputs.as_slice())
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    /// Get the nodes that list `id` as an input
    pub fn dependents(&self, id: &NodeId) -> &[NodeId] {
        self.dependents
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_node_ids(&self) -> HashSet<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.declared.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn entry_point(&self) -> &NodeId {
        &self.entry_point
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

impl std::fmt::Display for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Workflow Graph:")?;
        for node in self.nodes() {
            let inputs: Vec<&str> = node.inputs.iter().map(NodeId::as_str).collect();
            writeln!(
                f,
                "  {} ({}) <- [{}]",
                node.id,
                node.name,
                inputs.join(", ")
            )?;
        }
        Ok(())
    }
}
