//! Junction tree assembly.
//!
//! The maximal cliques of the triangulated moral graph are joined into a tree: clique pairs are
//! ranked by the number of nodes they share, and greedily joined in that order unless the join
//! would close a cycle, until there are `#cliques - 1` separators. The resulting join tree is
//! valid (running intersection holds) but not necessarily of minimal width.
//!
//! Every clique and separator owns a [`JunctionTable`] over its node set. Each per-node network
//! table is absorbed by the first clique covering its scope, which keeps slot pointers into it
//! for initialization and write-back.

use std::cmp::Reverse;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::compile::{self, EliminationOrder};
use crate::constraint::ParameterConstraint;
use crate::ipfp::ConstraintHandler;
use crate::network::{Network, NodeId, StateId};
use crate::table::{JunctionTable, ProbabilityTable, TablePointer};
use crate::{BnError, Result};

pub type CliqueId = usize;
pub type SeparatorId = usize;
pub type TableId = usize;

#[derive(Debug, Clone)]
pub struct Clique {
    nodes: Vec<NodeId>,
    table: TableId,
    pub(crate) neighbours: IndexMap<CliqueId, SeparatorId>,
}

impl Clique {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
    pub fn table(&self) -> TableId {
        self.table
    }
    pub fn neighbours(&self) -> &IndexMap<CliqueId, SeparatorId> {
        &self.neighbours
    }
}

#[derive(Debug, Clone)]
pub struct Separator {
    cliques: [CliqueId; 2],
    nodes: Vec<NodeId>,
    table: TableId,
    /// For each endpoint, the clique slots matching every separator slot.
    pub(crate) projections: [Vec<Vec<usize>>; 2],
}

impl Separator {
    pub fn cliques(&self) -> [CliqueId; 2] {
        self.cliques
    }
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
    pub fn table(&self) -> TableId {
        self.table
    }
    /// Position (0 or 1) of `clique` among the endpoints.
    pub(crate) fn side(&self, clique: CliqueId) -> Option<usize> {
        self.cliques.iter().position(|c| *c == clique)
    }
}

#[derive(Debug, Clone)]
pub struct JunctionTree {
    pub(crate) cliques: Vec<Clique>,
    pub(crate) separators: Vec<Separator>,
    pub(crate) tables: Vec<JunctionTable>,
    leaves: Vec<CliqueId>,
    /// network tables (identified by their node) absorbed by each clique
    absorbed: Vec<Vec<NodeId>>,
    by_size: Vec<TableId>,
    /// owning clique and handler of every registered constraint
    pub(crate) constraint_cliques: Vec<CliqueId>,
    pub(crate) handlers: Vec<ConstraintHandler>,
    pub(crate) targets: Vec<f64>,
    /// current evidence, one state per observed node
    pub(crate) evidence: Vec<StateId>,
}

fn shared(a: &[NodeId], b: &[NodeId]) -> Vec<NodeId> {
    a.iter().copied().filter(|n| b.contains(n)).collect()
}

impl JunctionTree {
    pub fn build(network: &Network, constraints: &[ParameterConstraint]) -> Result<Self> {
        Self::build_with(network, constraints, EliminationOrder::default())
    }

    pub fn build_with(
        network: &Network,
        constraints: &[ParameterConstraint],
        order: EliminationOrder,
    ) -> Result<Self> {
        let joined: Vec<Vec<NodeId>> = constraints.iter().map(|c| c.all_nodes()).collect();
        let clique_nodes = compile::compile(network, &joined, order);
        let mut tree = Self {
            cliques: Vec::with_capacity(clique_nodes.len()),
            separators: Vec::new(),
            tables: Vec::new(),
            leaves: Vec::new(),
            absorbed: vec![Vec::new(); clique_nodes.len()],
            by_size: Vec::new(),
            constraint_cliques: Vec::new(),
            handlers: Vec::new(),
            targets: Vec::new(),
            evidence: Vec::new(),
        };
        for nodes in clique_nodes {
            let table = tree.add_table(network, nodes.clone());
            tree.cliques.push(Clique {
                nodes,
                table,
                neighbours: IndexMap::new(),
            });
        }
        tree.join_cliques(network);
        tree.absorb_network_tables(network)?;
        tree.leaves = (0..tree.cliques.len())
            .filter(|c| tree.cliques[*c].neighbours.len() <= 1)
            .collect();
        tree.by_size = (0..tree.tables.len())
            .sorted_by_key(|t| tree.tables[*t].len())
            .collect();
        tree.initialize(network)?;
        for c in constraints {
            tree.register_constraint(c)?;
        }
        tracing::debug!(
            cliques = tree.cliques.len(),
            separators = tree.separators.len(),
            largest_table = tree.by_size.last().map_or(0, |t| tree.tables[*t].len()),
            "junction tree built"
        );
        Ok(tree)
    }

    fn add_table(&mut self, network: &Network, nodes: Vec<NodeId>) -> TableId {
        self.tables.push(JunctionTable::new(ProbabilityTable::new(
            network,
            nodes,
            Vec::new(),
        )));
        self.tables.len() - 1
    }

    /// Whether `to` can be reached from `from` through existing separators.
    fn connected(&self, from: CliqueId, to: CliqueId) -> bool {
        let mut visited = vec![false; self.cliques.len()];
        let mut stack = vec![from];
        while let Some(c) = stack.pop() {
            if c == to {
                return true;
            }
            if !std::mem::replace(&mut visited[c], true) {
                stack.extend(self.cliques[c].neighbours.keys().copied());
            }
        }
        false
    }

    fn join_cliques(&mut self, network: &Network) {
        let n = self.cliques.len();
        let ranked: Vec<(CliqueId, CliqueId)> = (0..n)
            .tuple_combinations()
            .sorted_by_key(|(a, b)| {
                let overlap = shared(&self.cliques[*a].nodes, &self.cliques[*b].nodes).len();
                (Reverse(overlap), *a, *b)
            })
            .collect();
        for (a, b) in ranked {
            if self.separators.len() + 1 >= n {
                break;
            }
            if !self.connected(a, b) {
                self.add_separator(network, a, b);
            }
        }
    }

    fn add_separator(&mut self, network: &Network, a: CliqueId, b: CliqueId) {
        let nodes = shared(&self.cliques[a].nodes, &self.cliques[b].nodes);
        let table = self.add_table(network, nodes.clone());
        let projections = [a, b].map(|c| {
            let clique_table = &self.tables[self.cliques[c].table];
            self.tables[table]
                .table()
                .keys()
                .map(|key| clique_table.slots_matching(key.states()))
                .collect::<Vec<_>>()
        });
        let id = self.separators.len();
        self.separators.push(Separator {
            cliques: [a, b],
            nodes,
            table,
            projections,
        });
        self.cliques[a].neighbours.insert(b, id);
        self.cliques[b].neighbours.insert(a, id);
    }

    fn absorb_network_tables(&mut self, network: &Network) -> Result<()> {
        for node in network.node_ids() {
            let net_table = network.table(node);
            let clique = self
                .cliques
                .iter()
                .position(|c| net_table.scope().iter().all(|n| c.nodes.contains(n)))
                .ok_or_else(|| BnError::NoOwningClique(net_table.scope().to_vec()))?;
            let table = &mut self.tables[self.cliques[clique].table];
            let slots = table
                .table()
                .keys()
                .map(|key| net_table.slot(net_table.project_key(key).states()))
                .collect::<Result<Vec<usize>>>()?;
            table.pointers.push(TablePointer { node, slots });
            self.absorbed[clique].push(node);
        }
        Ok(())
    }

    /// Load the product of the absorbed network tables into the cliques, then calibrate so that
    /// every table holds the marginal of the network joint over its scope.
    fn initialize(&mut self, network: &Network) -> Result<()> {
        for clique in &self.cliques {
            let table = &mut self.tables[clique.table];
            let mut values = table.table.values_mut();
            values.fill(1.0);
            for pointer in &table.pointers {
                let net_values = network.table(pointer.node).values();
                for (v, s) in values.iter_mut().zip(pointer.slots.iter()) {
                    *v *= net_values[*s];
                }
            }
        }
        for sep in &self.separators {
            self.tables[sep.table].table.values_mut().fill(1.0);
        }
        if let Some(root) = self.leaves.first().copied() {
            self.propagate(root)?;
        }
        for table in self.tables.iter_mut() {
            table.marginalize();
        }
        Ok(())
    }

    pub fn cliques(&self) -> &[Clique] {
        &self.cliques
    }
    pub fn clique(&self, id: CliqueId) -> &Clique {
        &self.cliques[id]
    }
    pub fn separators(&self) -> &[Separator] {
        &self.separators
    }
    pub fn separator(&self, id: SeparatorId) -> &Separator {
        &self.separators[id]
    }
    pub fn table(&self, id: TableId) -> &JunctionTable {
        &self.tables[id]
    }
    pub fn clique_table(&self, id: CliqueId) -> &JunctionTable {
        &self.tables[self.cliques[id].table]
    }
    /// Cliques with at most one separator.
    pub fn leaves(&self) -> &[CliqueId] {
        &self.leaves
    }
    /// Network tables (by node) absorbed by `clique`.
    pub fn absorbed(&self, clique: CliqueId) -> &[NodeId] {
        &self.absorbed[clique]
    }
    /// All clique and separator tables, smallest first.
    pub fn tables_by_size(&self) -> &[TableId] {
        &self.by_size
    }

    /// Smallest clique whose node set covers `nodes`.
    pub fn clique_containing(&self, nodes: &[NodeId]) -> Option<CliqueId> {
        (0..self.cliques.len())
            .filter(|c| nodes.iter().all(|n| self.cliques[*c].nodes.contains(n)))
            .min_by_key(|c| self.clique_table(*c).len())
    }

    /// Cliques on the tree path from `from` to `to`, both included.
    pub fn path(&self, from: CliqueId, to: CliqueId) -> Vec<CliqueId> {
        let mut parent: Vec<Option<CliqueId>> = vec![None; self.cliques.len()];
        let mut visited = vec![false; self.cliques.len()];
        let mut stack = vec![from];
        visited[from] = true;
        while let Some(c) = stack.pop() {
            for n in self.cliques[c].neighbours.keys() {
                if !visited[*n] {
                    visited[*n] = true;
                    parent[*n] = Some(c);
                    stack.push(*n);
                }
            }
        }
        let mut path = vec![to];
        let mut cur = to;
        while let Some(p) = parent[cur] {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }

    /// Register a constraint on its owning clique; returns its index for
    /// [`JunctionTree::adjust_and_return_error`].
    pub fn register_constraint(&mut self, constraint: &ParameterConstraint) -> Result<usize> {
        let nodes = constraint.all_nodes();
        let clique = self
            .clique_containing(&nodes)
            .ok_or(BnError::NoOwningClique(nodes))?;
        let handler = ConstraintHandler::new(constraint, self.clique_table(clique));
        self.constraint_cliques.push(clique);
        self.handlers.push(handler);
        self.targets.push(constraint.probability());
        Ok(self.handlers.len() - 1)
    }
    pub fn n_constraints(&self) -> usize {
        self.handlers.len()
    }
    pub fn constraint_clique(&self, constraint: usize) -> Result<CliqueId> {
        self.constraint_cliques
            .get(constraint)
            .copied()
            .ok_or(BnError::UnknownConstraint(constraint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag(n: usize, edges: &[(NodeId, NodeId)]) -> Network {
        let mut net = Network::new();
        for i in 0..n {
            let id = net.add_node(&format!("N{i}")).unwrap();
            net.add_state(id, "t").unwrap();
            net.add_state(id, "f").unwrap();
        }
        for (p, c) in edges {
            net.add_edge(*p, *c).unwrap();
        }
        net
    }

    #[test]
    fn chain_tree_shape() {
        let net = dag(4, &[(0, 1), (1, 2), (2, 3)]);
        let tree = JunctionTree::build(&net, &[]).unwrap();
        assert_eq!(tree.cliques().len(), 3);
        assert_eq!(tree.separators().len(), 2);
        assert_eq!(tree.leaves().len(), 2);
        for sep in tree.separators() {
            assert_eq!(sep.nodes().len(), 1);
        }
        assert_eq!(tree.path(0, 2), vec![0, 1, 2]);
    }

    #[test]
    fn disconnected_components_are_joined() {
        let net = dag(4, &[(0, 1), (2, 3)]);
        let tree = JunctionTree::build(&net, &[]).unwrap();
        assert_eq!(tree.cliques().len(), 2);
        assert_eq!(tree.separators().len(), 1);
        let sep = &tree.separators()[0];
        assert!(sep.nodes().is_empty());
        assert_eq!(tree.table(sep.table()).len(), 1);
        assert!((tree.table(sep.table()).sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn every_network_table_is_absorbed_once() {
        let net = dag(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)]);
        let tree = JunctionTree::build(&net, &[]).unwrap();
        let mut absorbed: Vec<NodeId> = (0..tree.cliques().len())
            .flat_map(|c| tree.absorbed(c).to_vec())
            .collect();
        absorbed.sort_unstable();
        assert_eq!(absorbed, vec![0, 1, 2, 3, 4]);
        for c in 0..tree.cliques().len() {
            for n in tree.absorbed(c) {
                for s in net.table(*n).scope() {
                    assert!(tree.clique(c).nodes().contains(s));
                }
            }
        }
    }

    #[test]
    fn uniform_network_gives_uniform_tables() {
        let net = dag(3, &[(0, 1), (1, 2)]);
        let tree = JunctionTree::build(&net, &[]).unwrap();
        for t in tree.tables_by_size() {
            let table = tree.table(*t);
            let expected = 1.0 / table.len() as f64;
            assert!(table.active().iter().all(|p| (p - expected).abs() < 1e-12));
        }
        let sizes: Vec<usize> = tree.tables_by_size().iter().map(|t| tree.table(*t).len()).collect();
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn constraints_get_an_owning_clique() {
        let net = dag(3, &[(0, 1), (1, 2)]);
        let n0 = net.state("N0", "t").unwrap();
        let n2 = net.state("N2", "t").unwrap();
        let c = ParameterConstraint::conditional(&net, [n2], [n0], 0.3).unwrap();
        let tree = JunctionTree::build(&net, &[c]).unwrap();
        let clique = tree.constraint_clique(0).unwrap();
        assert!(tree.clique(clique).nodes().contains(&0));
        assert!(tree.clique(clique).nodes().contains(&2));
        assert!(matches!(
            tree.constraint_clique(1),
            Err(BnError::UnknownConstraint(1))
        ));
    }
}
