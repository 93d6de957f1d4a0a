#![allow(dead_code)]

use bnfit::{Network, NodeId, StateId, StateKey};
use itertools::Itertools;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

pub fn rng(seed: u64) -> Xoshiro256StarStar {
    Xoshiro256StarStar::seed_from_u64(seed)
}

/// Random DAG over `n` nodes with 2 or 3 states each, at most `max_parents` parents per node
/// (taken among the previous nodes) and random tables.
pub fn random_network(rng: &mut Xoshiro256StarStar, n: usize, max_parents: usize) -> Network {
    let mut net = Network::new();
    for i in 0..n {
        let id = net.add_node(&format!("N{i}")).unwrap();
        for s in 0..rng.gen_range(2..=3) {
            net.add_state(id, &format!("s{s}")).unwrap();
        }
    }
    for child in 1..n {
        for _ in 0..rng.gen_range(0..=max_parents.min(child)) {
            let parent = rng.gen_range(0..child);
            net.add_edge(parent, child).unwrap();
        }
    }
    randomize_tables(&mut net, rng);
    net
}

pub fn randomize_tables(net: &mut Network, rng: &mut Xoshiro256StarStar) {
    for node in net.node_ids() {
        let table = net.table_mut(node);
        let keys: Vec<StateKey> = table.keys().cloned().collect();
        for key in keys {
            table
                .set_probability(key.states(), rng.gen_range(0.05..1.0))
                .unwrap();
        }
        table.normalize_conditional();
    }
}

/// Every joint configuration of the network with its probability.
pub fn joint(net: &Network) -> Vec<(Vec<StateId>, f64)> {
    net.node_ids()
        .map(|n| net.node(n).states().to_vec())
        .multi_cartesian_product()
        .map(|config| {
            let key = StateKey::new(config.iter().copied());
            let p = net
                .node_ids()
                .map(|n| {
                    let table = net.table(n);
                    table.probability(table.project_key(&key).states()).unwrap()
                })
                .product();
            (config, p)
        })
        .collect()
}

/// Probability that every state of `states` holds, by enumeration.
pub fn brute_probability(net: &Network, states: &[StateId]) -> f64 {
    joint(net)
        .iter()
        .filter(|(config, _)| states.iter().all(|s| config.contains(s)))
        .map(|(_, p)| p)
        .sum()
}

/// First state of every node of `nodes`.
pub fn first_states(net: &Network, nodes: &[NodeId]) -> Vec<StateId> {
    nodes.iter().map(|n| net.node(*n).states()[0]).collect()
}
