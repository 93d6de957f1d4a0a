//! Network description: nodes, their states, directed edges and per-node tables.
//!
//! Nodes and states live in arenas and are referred to by [`NodeId`] and [`StateId`] handles.
//! Every node owns a network table (conditional on its parents, or marginal for root nodes)
//! and an observation table holding its latest posterior. Tables are rebuilt whenever the
//! structure around a node changes, and start out uniform.

use indexmap::IndexMap;
use thiserror::Error;

use crate::table::ProbabilityTable;

pub type NodeId = usize;
pub type StateId = usize;

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("A node named {0} already exists.")]
    DuplicateNode(String),
    #[error("Node {node} already has a state {state}.")]
    DuplicateState { node: String, state: String },
    #[error("No node named {0}.")]
    UnknownNode(String),
    #[error("Node {node} has no state {state}.")]
    UnknownState { node: String, state: String },
    #[error("Edge {parent} -> {child} would create a cycle.")]
    CyclicEdge { parent: String, child: String },
}

type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    states: Vec<StateId>,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn states(&self) -> &[StateId] {
        &self.states
    }
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct NodeState {
    value: String,
    node: NodeId,
}

impl NodeState {
    pub fn value(&self) -> &str {
        &self.value
    }
    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Posterior marginal of a node, as computed by the last evidence query.
#[derive(Debug, Clone)]
pub struct Observation {
    pub(crate) table: ProbabilityTable,
    pub(crate) label: String,
}

impl Observation {
    pub fn table(&self) -> &ProbabilityTable {
        &self.table
    }
    /// Human-readable description, e.g. `P(RAIN | WET_GRASS:T)`.
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: IndexMap<String, Node>,
    states: Vec<NodeState>,
    tables: Vec<ProbabilityTable>,
    observations: Vec<Observation>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) -> Result<NodeId> {
        if self.nodes.contains_key(name) {
            return Err(NetworkError::DuplicateNode(name.to_owned()));
        }
        let (id, _) = self.nodes.insert_full(
            name.to_owned(),
            Node {
                name: name.to_owned(),
                states: Vec::new(),
                parents: Vec::new(),
                children: Vec::new(),
            },
        );
        let table = ProbabilityTable::for_node(self, id);
        self.tables.push(table);
        let observation = self.fresh_observation(id);
        self.observations.push(observation);
        Ok(id)
    }

    pub fn add_state(&mut self, node: NodeId, value: &str) -> Result<StateId> {
        self.check_node(node)?;
        if self.state_id(node, value).is_ok() {
            return Err(NetworkError::DuplicateState {
                node: self.nodes[node].name.clone(),
                state: value.to_owned(),
            });
        }
        let id = self.states.len();
        self.states.push(NodeState {
            value: value.to_owned(),
            node,
        });
        self.nodes[node].states.push(id);
        self.rebuild_tables(node);
        Ok(id)
    }

    /// Add the directed edge `parent -> child`. Adding an existing edge is a no-op.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        if self.nodes[child].parents.contains(&parent) {
            return Ok(());
        }
        if parent == child || self.reaches(child, parent) {
            return Err(NetworkError::CyclicEdge {
                parent: self.nodes[parent].name.clone(),
                child: self.nodes[child].name.clone(),
            });
        }
        self.nodes[parent].children.push(child);
        self.nodes[child].parents.push(parent);
        self.tables[child] = ProbabilityTable::for_node(self, child);
        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(NetworkError::UnknownNode(format!("#{node}")))
        }
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if !std::mem::replace(&mut seen[n], true) {
                stack.extend(self.nodes[n].children.iter().copied());
            }
        }
        false
    }

    fn rebuild_tables(&mut self, node: NodeId) {
        let affected: Vec<NodeId> = std::iter::once(node)
            .chain(self.nodes[node].children.iter().copied())
            .collect();
        for n in affected {
            self.tables[n] = ProbabilityTable::for_node(self, n);
        }
        self.observations[node] = self.fresh_observation(node);
    }

    fn fresh_observation(&self, node: NodeId) -> Observation {
        let mut table = ProbabilityTable::new(self, vec![node], Vec::new());
        table.fill_uniform();
        Observation {
            table,
            label: format!("P({})", self.nodes[node].name),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
    pub fn node_ids(&self) -> std::ops::Range<NodeId> {
        0..self.nodes.len()
    }
    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.nodes
            .get_index_of(name)
            .ok_or_else(|| NetworkError::UnknownNode(name.to_owned()))
    }
    pub fn state_id(&self, node: NodeId, value: &str) -> Result<StateId> {
        self.check_node(node)?;
        self.nodes[node]
            .states
            .iter()
            .copied()
            .find(|s| self.states[*s].value == value)
            .ok_or_else(|| NetworkError::UnknownState {
                node: self.nodes[node].name.clone(),
                state: value.to_owned(),
            })
    }
    /// Look a state up by node name and state value.
    pub fn state(&self, node: &str, value: &str) -> Result<StateId> {
        self.state_id(self.node_id(node)?, value)
    }
    pub fn contains_state(&self, state: StateId) -> bool {
        state < self.states.len()
    }
    pub fn node_state(&self, state: StateId) -> &NodeState {
        &self.states[state]
    }
    pub fn state_node(&self, state: StateId) -> NodeId {
        self.states[state].node
    }
    /// `NODE:value` representation of a state.
    pub fn describe_state(&self, state: StateId) -> String {
        let s = self.node_state(state);
        format!("{}:{}", self.nodes[s.node].name, s.value)
    }

    /// Network table of `node`: `P(node | parents)`, or `P(node)` for a root.
    pub fn table(&self, node: NodeId) -> &ProbabilityTable {
        &self.tables[node]
    }
    pub fn table_mut(&mut self, node: NodeId) -> &mut ProbabilityTable {
        &mut self.tables[node]
    }
    pub fn observation(&self, node: NodeId) -> &Observation {
        &self.observations[node]
    }
    pub(crate) fn observation_mut(&mut self, node: NodeId) -> &mut Observation {
        &mut self.observations[node]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_rejected() {
        let mut net = Network::new();
        let a = net.add_node("A").unwrap();
        assert!(matches!(
            net.add_node("A"),
            Err(NetworkError::DuplicateNode(_))
        ));
        net.add_state(a, "x").unwrap();
        assert!(matches!(
            net.add_state(a, "x"),
            Err(NetworkError::DuplicateState { .. })
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut net = Network::new();
        let a = net.add_node("A").unwrap();
        let b = net.add_node("B").unwrap();
        let c = net.add_node("C").unwrap();
        net.add_edge(a, b).unwrap();
        net.add_edge(b, c).unwrap();
        assert!(matches!(
            net.add_edge(c, a),
            Err(NetworkError::CyclicEdge { .. })
        ));
        assert!(net.add_edge(a, a).is_err());
        assert!(matches!(
            net.add_edge(a, 7),
            Err(NetworkError::UnknownNode(_))
        ));
        assert!(matches!(
            net.add_state(7, "x"),
            Err(NetworkError::UnknownNode(_))
        ));
        assert!(net.state_id(7, "x").is_err());
        // repeated edge is a no-op
        net.add_edge(a, b).unwrap();
        assert_eq!(net.node(b).parents(), &[a]);
    }

    #[test]
    fn tables_follow_structure() {
        let mut net = Network::new();
        let a = net.add_node("A").unwrap();
        let b = net.add_node("B").unwrap();
        for s in ["0", "1", "2"] {
            net.add_state(a, s).unwrap();
        }
        net.add_state(b, "t").unwrap();
        net.add_state(b, "f").unwrap();
        net.add_edge(a, b).unwrap();
        assert_eq!(net.table(b).len(), 6);
        assert_eq!(net.table(b).events(), &[b]);
        assert_eq!(net.table(b).conditions(), &[a]);
        let key = [net.state("A", "1").unwrap(), net.state("B", "t").unwrap()];
        assert_eq!(net.table(b).probability(&key).unwrap(), 0.5);
        assert_eq!(net.observation(a).label(), "P(A)");
        assert_eq!(net.describe_state(key[1]), "B:t");
        assert_eq!(net.node_state(key[1]).value(), "t");
        assert_eq!(net.node_state(key[1]).node(), b);
        assert!(net.table(b).is_conditional());
        assert!(!net.table(a).is_conditional());
        assert!(net.state("B", "x").is_err());
        assert!(net.node_id("C").is_err());
    }
}
