//! Graph compilation: moral graph, triangulation by variable elimination and maximal cliques.
//!
//! Undirected graphs are adjacency lists indexed by [`NodeId`], with ordered neighbour sets so
//! that every step is deterministic.

use std::collections::BTreeSet;

use itertools::Itertools;

use crate::network::{Network, NodeId};

pub type Adjacency = Vec<BTreeSet<NodeId>>;

/// Order in which nodes are eliminated during triangulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EliminationOrder {
    /// Node insertion order.
    #[default]
    Insertion,
    /// Greedily eliminate the node needing the fewest fill-in edges (ties: lowest id).
    MinFill,
}

fn connect_all(graph: &mut Adjacency, nodes: &[NodeId]) {
    for (a, b) in nodes.iter().tuple_combinations() {
        if a != b {
            graph[*a].insert(*b);
            graph[*b].insert(*a);
        }
    }
}

/// Moral graph of `network`: every node is linked to its parents and children, and the parents
/// of a common child are married. Every node set of `joined` is additionally made complete, so
/// that some clique of the triangulated graph covers it.
pub fn moralize(network: &Network, joined: &[Vec<NodeId>]) -> Adjacency {
    let mut graph: Adjacency = vec![BTreeSet::new(); network.len()];
    for n in network.node_ids() {
        let node = network.node(n);
        for p in node.parents() {
            graph[n].insert(*p);
            graph[*p].insert(n);
        }
        for c in node.children() {
            graph[n].insert(*c);
            graph[*c].insert(n);
        }
        connect_all(&mut graph, node.parents());
    }
    for nodes in joined {
        connect_all(&mut graph, nodes);
    }
    graph
}

fn fill_in_count(graph: &Adjacency, node: NodeId) -> usize {
    graph[node]
        .iter()
        .tuple_combinations()
        .filter(|(a, b)| !graph[**a].contains(*b))
        .count()
}

pub fn elimination_order(graph: &Adjacency, order: EliminationOrder) -> Vec<NodeId> {
    match order {
        EliminationOrder::Insertion => (0..graph.len()).collect(),
        EliminationOrder::MinFill => {
            let mut working = graph.clone();
            let mut remaining: BTreeSet<NodeId> = (0..graph.len()).collect();
            let mut res = Vec::with_capacity(graph.len());
            loop {
                let Some(next) = remaining
                    .iter()
                    .copied()
                    .min_by_key(|n| (fill_in_count(&working, *n), *n))
                else {
                    break;
                };
                eliminate(&mut working, None, next);
                remaining.remove(&next);
                res.push(next);
            }
            res
        }
    }
}

/// Eliminate `node` from `working`: its neighbours become pairwise connected (in `working` and
/// in `out`, if given), then the node is detached.
fn eliminate(working: &mut Adjacency, mut out: Option<&mut Adjacency>, node: NodeId) {
    let neighbours: Vec<NodeId> = working[node].iter().copied().collect();
    connect_all(working, &neighbours);
    if let Some(out) = out.as_deref_mut() {
        connect_all(out, &neighbours);
    }
    for n in neighbours {
        working[n].remove(&node);
    }
    working[node].clear();
}

/// Chordal supergraph of `moral`, obtained by eliminating nodes in `order`.
/// The result keeps every node and edge of `moral` and adds the fill-in edges.
pub fn triangulate(moral: &Adjacency, order: &[NodeId]) -> Adjacency {
    let mut working = moral.clone();
    let mut chordal = moral.clone();
    for node in order {
        eliminate(&mut working, Some(&mut chordal), *node);
    }
    chordal
}

/// Vertices sorted by ascending degree, the degree being recomputed as vertices are consumed.
fn degeneracy_ordering(graph: &Adjacency) -> Vec<NodeId> {
    let mut degree: Vec<usize> = graph.iter().map(BTreeSet::len).collect();
    let mut consumed = vec![false; graph.len()];
    let mut order = Vec::with_capacity(graph.len());
    for _ in 0..graph.len() {
        let Some(v) = (0..graph.len())
            .filter(|v| !consumed[*v])
            .min_by_key(|v| (degree[*v], *v))
        else {
            break;
        };
        consumed[v] = true;
        for n in &graph[v] {
            if !consumed[*n] {
                degree[*n] -= 1;
            }
        }
        order.push(v);
    }
    order
}

struct Frame {
    r: Vec<NodeId>,
    p: BTreeSet<NodeId>,
    x: BTreeSet<NodeId>,
    todo: Vec<NodeId>,
}

/// Bron–Kerbosch frame for (R, P, X); records R and returns `None` when it is a leaf.
fn new_frame(
    graph: &Adjacency,
    r: Vec<NodeId>,
    p: BTreeSet<NodeId>,
    x: BTreeSet<NodeId>,
    cliques: &mut Vec<Vec<NodeId>>,
) -> Option<Frame> {
    if p.is_empty() {
        if x.is_empty() {
            cliques.push(r);
        }
        return None;
    }
    let pivot = p
        .iter()
        .chain(x.iter())
        .copied()
        .max_by_key(|u| p.intersection(&graph[*u]).count())?;
    let todo = p.difference(&graph[pivot]).copied().collect();
    Some(Frame { r, p, x, todo })
}

/// All maximal cliques of `graph`, each sorted, in lexicographic order.
///
/// Bron–Kerbosch with pivoting; the outer level follows a degeneracy ordering, so that the
/// candidate set of each sub-search is bounded by the graph degeneracy.
pub fn maximal_cliques(graph: &Adjacency) -> Vec<Vec<NodeId>> {
    let mut cliques = Vec::new();
    let order = degeneracy_ordering(graph);
    let mut position = vec![0; graph.len()];
    for (i, v) in order.iter().enumerate() {
        position[*v] = i;
    }
    for v in order.iter().copied() {
        let (later, earlier): (BTreeSet<NodeId>, BTreeSet<NodeId>) =
            graph[v].iter().partition(|n| position[**n] > position[v]);
        let mut stack: Vec<Frame> = new_frame(graph, vec![v], later, earlier, &mut cliques)
            .into_iter()
            .collect();
        while let Some(frame) = stack.last_mut() {
            let Some(u) = frame.todo.pop() else {
                stack.pop();
                continue;
            };
            let mut r = frame.r.clone();
            r.push(u);
            let p = frame.p.intersection(&graph[u]).copied().collect();
            let x = frame.x.intersection(&graph[u]).copied().collect();
            frame.p.remove(&u);
            frame.x.insert(u);
            if let Some(child) = new_frame(graph, r, p, x, &mut cliques) {
                stack.push(child);
            }
        }
    }
    for c in cliques.iter_mut() {
        c.sort_unstable();
    }
    cliques.sort();
    cliques
}

/// Full compilation: maximal cliques of the triangulated moral graph.
pub fn compile(
    network: &Network,
    joined: &[Vec<NodeId>],
    order: EliminationOrder,
) -> Vec<Vec<NodeId>> {
    let moral = moralize(network, joined);
    let elimination = elimination_order(&moral, order);
    let chordal = triangulate(&moral, &elimination);
    maximal_cliques(&chordal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(NodeId, NodeId)]) -> Adjacency {
        let mut g = vec![BTreeSet::new(); n];
        for (a, b) in edges {
            g[*a].insert(*b);
            g[*b].insert(*a);
        }
        g
    }

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
    fn moralization_marries_parents() {
        let net = dag(3, &[(0, 2), (1, 2)]);
        let moral = moralize(&net, &[]);
        assert!(moral[0].contains(&1));
        assert!(moral[2].contains(&0) && moral[2].contains(&1));
    }

    #[test]
    fn joined_sets_become_complete() {
        let net = dag(3, &[(0, 1), (1, 2)]);
        let moral = moralize(&net, &[vec![0, 2]]);
        assert!(moral[0].contains(&2));
        assert_eq!(compile(&net, &[vec![0, 2]], EliminationOrder::Insertion), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn five_cycle_is_triangulated() {
        let g = graph(5, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)]);
        let chordal = triangulate(&g, &[0, 1, 2, 3, 4]);
        let n_edges: usize = chordal.iter().map(BTreeSet::len).sum::<usize>() / 2;
        assert_eq!(n_edges, 7);
        assert_eq!(
            maximal_cliques(&chordal),
            vec![vec![0, 1, 4], vec![1, 2, 4], vec![2, 3, 4]]
        );
    }

    #[test]
    fn min_fill_avoids_needless_fill_in() {
        // star centred on 0: eliminating the centre first would connect all leaves
        let g = graph(4, &[(0, 1), (0, 2), (0, 3)]);
        let order = elimination_order(&g, EliminationOrder::MinFill);
        assert_eq!(order[0], 1);
        let chordal = triangulate(&g, &order);
        assert_eq!(maximal_cliques(&chordal), vec![vec![0, 1], vec![0, 2], vec![0, 3]]);
        let chordal = triangulate(&g, &[0, 1, 2, 3]);
        assert_eq!(maximal_cliques(&chordal), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn cliques_of_classic_networks() {
        let sprinkler = dag(3, &[(0, 1), (0, 2), (1, 2)]);
        assert_eq!(compile(&sprinkler, &[], EliminationOrder::Insertion), vec![vec![0, 1, 2]]);
        let chain = dag(3, &[(0, 1), (1, 2)]);
        assert_eq!(
            compile(&chain, &[], EliminationOrder::Insertion),
            vec![vec![0, 1], vec![1, 2]]
        );
        let diamond = dag(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        assert_eq!(
            compile(&diamond, &[], EliminationOrder::Insertion),
            vec![vec![0, 1, 2], vec![1, 2, 3]]
        );
    }

    #[test]
    fn isolated_nodes_are_cliques() {
        let g = graph(3, &[(0, 1)]);
        assert_eq!(maximal_cliques(&g), vec![vec![0, 1], vec![2]]);
        assert!(maximal_cliques(&Vec::new()).is_empty());
    }
}
