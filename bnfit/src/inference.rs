//! Evidence queries and write-back of the fitted parameters.
//!
//! Evidence is entered on the observed shadow arrays of the tables, so that the calibrated
//! tables are left untouched and evidence can be changed or cleared at any time. After a
//! collect/distribute pass every table holds `P(scope, evidence)`, and the probability of the
//! evidence is the total mass of any table (the smallest one is used).

use itertools::Itertools;

use crate::junction_tree::JunctionTree;
use crate::network::{Network, NodeId, StateId};
use crate::{BnError, Result};

impl JunctionTree {
    /// Current evidence, one state per observed node.
    pub fn evidence(&self) -> &[StateId] {
        &self.evidence
    }

    /// `InvalidKey` unless every state belongs to a node of the tree.
    fn check_evidence(&self, evidence: &[StateId]) -> Result<()> {
        let unknown: Vec<StateId> = evidence
            .iter()
            .copied()
            .filter(|s| !self.tables.iter().any(|t| t.table().contains_state(*s)))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(BnError::InvalidKey(unknown))
        }
    }

    /// Replace the evidence and propagate it through the tree. Unknown states leave the
    /// current evidence in place.
    pub(crate) fn set_evidence(&mut self, evidence: &[StateId]) -> Result<()> {
        self.check_evidence(evidence)?;
        let observed = !evidence.is_empty();
        for table in self.tables.iter_mut() {
            table.set_observed(evidence, observed);
        }
        self.evidence = evidence.to_vec();
        if observed {
            self.propagate_all()?;
        }
        Ok(())
    }

    /// Drop the evidence. The calibrated tables are visible again.
    pub fn clear_evidence(&mut self) {
        for table in self.tables.iter_mut() {
            table.set_observed(&[], false);
        }
        self.evidence.clear();
    }

    /// `P(evidence)`, or 1 without evidence.
    pub fn probability_of_evidence(&self) -> f64 {
        self.tables_by_size()
            .first()
            .map_or(1.0, |t| self.table(*t).sum())
    }

    /// `P(extra | evidence)` for the current evidence. The evidence is restored afterwards.
    ///
    /// A state of an already observed node that differs from its observed state has
    /// probability 0.
    pub fn probability_from_current_observations(&mut self, extra: &[StateId]) -> Result<f64> {
        let base = self.probability_of_evidence();
        if base == 0.0 {
            return Ok(0.0);
        }
        let previous = self.evidence.clone();
        let extended: Vec<StateId> = previous
            .iter()
            .chain(extra.iter())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect();
        self.set_evidence(&extended)?;
        let joint = self.probability_of_evidence();
        self.set_evidence(&previous)?;
        Ok(joint / base)
    }

    /// `P(node | evidence)` for every state of `node`, in the node's state order.
    pub fn posterior(&self, network: &Network, node: NodeId) -> Vec<f64> {
        let states = network.node(node).states();
        let Some(clique) = self.clique_containing(&[node]) else {
            return vec![0.0; states.len()];
        };
        let table = self.clique_table(clique);
        let total = table.sum();
        states
            .iter()
            .map(|s| {
                if total == 0.0 {
                    0.0
                } else {
                    table.sum_over_states(&[*s]) / total
                }
            })
            .collect()
    }

    /// Enter `evidence` and store the resulting posterior of every node in its observation
    /// table, labelled e.g. `P(RAIN | WET_GRASS:T)`.
    ///
    /// An empty evidence clears the evidence and stores the prior marginals.
    pub fn observe_network(&mut self, network: &mut Network, evidence: &[StateId]) -> Result<()> {
        if let Some(s) = evidence.iter().find(|s| !network.contains_state(**s)) {
            return Err(BnError::InvalidKey(vec![*s]));
        }
        if evidence.is_empty() {
            self.clear_evidence();
        } else {
            self.set_evidence(evidence)?;
            if self.probability_of_evidence() == 0.0 {
                tracing::warn!(?evidence, "evidence has zero probability");
            }
        }
        let given = evidence
            .iter()
            .map(|s| network.describe_state(*s))
            .join(", ");
        for node in network.node_ids() {
            let posterior = self.posterior(network, node);
            let states = network.node(node).states().to_vec();
            let label = if given.is_empty() {
                format!("P({})", network.node(node).name())
            } else {
                format!("P({} | {})", network.node(node).name(), given)
            };
            let observation = network.observation_mut(node);
            for (s, p) in states.iter().zip(posterior) {
                observation.table.set_probability(&[*s], p)?;
            }
            observation.label = label;
        }
        tracing::debug!(
            evidence = evidence.len(),
            probability = self.probability_of_evidence(),
            "network observed"
        );
        Ok(())
    }

    /// Write the calibrated clique marginals back onto the absorbed network tables, as
    /// conditionals of every node given its parents.
    ///
    /// Reads the calibrated arrays, whatever the current evidence.
    pub fn write_tables_to_network(&self, network: &mut Network) -> Result<()> {
        for clique in &self.cliques {
            let table = &self.tables[clique.table()];
            let values = table.table().values();
            for pointer in &table.pointers {
                let net_table = network.table_mut(pointer.node);
                let mut net_values = net_table.values_mut();
                net_values.fill(0.0);
                for (p, s) in values.iter().zip(pointer.slots.iter()) {
                    net_values[*s] += *p;
                }
                net_table.normalize_conditional();
            }
        }
        Ok(())
    }
}
