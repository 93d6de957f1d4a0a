//! Marginal and conditional probability constraints.

use itertools::Itertools;
use thiserror::Error;

use crate::network::{Network, NodeId, StateId};

#[derive(Debug, Clone, Error)]
pub enum ConstraintError {
    #[error("A constraint needs at least one event state.")]
    EmptyEvent,
    #[error("Probability {0} is outside [0, 1].")]
    ProbabilityOutOfRange(f64),
    #[error("Condition state {0} belongs to an event node.")]
    ConditionInEventNode(String),
    #[error("Node {0} has more than one state in the same state set.")]
    RepeatedNode(String),
    #[error("No state with id {0} in the network.")]
    UnknownState(StateId),
}

type Result<T> = std::result::Result<T, ConstraintError>;

/// States of distinct nodes, sorted by state id, with their nodes (in the same order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSet {
    states: Vec<StateId>,
    nodes: Vec<NodeId>,
}

impl StateSet {
    fn new(network: &Network, states: impl IntoIterator<Item = StateId>) -> Result<Self> {
        let mut states: Vec<StateId> = states.into_iter().collect();
        states.sort_unstable();
        states.dedup();
        if let Some(s) = states.iter().find(|s| !network.contains_state(**s)) {
            return Err(ConstraintError::UnknownState(*s));
        }
        let nodes: Vec<NodeId> = states.iter().map(|s| network.state_node(*s)).collect();
        if let Some(n) = nodes.iter().duplicates().next() {
            return Err(ConstraintError::RepeatedNode(
                network.node(*n).name().to_owned(),
            ));
        }
        Ok(Self { states, nodes })
    }
    pub fn states(&self) -> &[StateId] {
        &self.states
    }
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterConstraint {
    /// `P(event) = probability`
    Marginal { event: StateSet, probability: f64 },
    /// `P(event | condition) = probability`
    Conditional {
        event: StateSet,
        condition: StateSet,
        probability: f64,
    },
}

fn check_probability(p: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(ConstraintError::ProbabilityOutOfRange(p))
    }
}

impl ParameterConstraint {
    pub fn marginal(
        network: &Network,
        event: impl IntoIterator<Item = StateId>,
        probability: f64,
    ) -> Result<Self> {
        let event = StateSet::new(network, event)?;
        if event.states.is_empty() {
            return Err(ConstraintError::EmptyEvent);
        }
        Ok(Self::Marginal {
            event,
            probability: check_probability(probability)?,
        })
    }

    /// Conditional constraint. An empty `condition` gives a marginal constraint.
    pub fn conditional(
        network: &Network,
        event: impl IntoIterator<Item = StateId>,
        condition: impl IntoIterator<Item = StateId>,
        probability: f64,
    ) -> Result<Self> {
        let condition = StateSet::new(network, condition)?;
        if condition.states.is_empty() {
            return Self::marginal(network, event, probability);
        }
        let event = StateSet::new(network, event)?;
        if event.states.is_empty() {
            return Err(ConstraintError::EmptyEvent);
        }
        if let Some(s) = condition
            .states
            .iter()
            .find(|s| event.nodes.contains(&network.state_node(**s)))
        {
            return Err(ConstraintError::ConditionInEventNode(
                network.describe_state(*s),
            ));
        }
        Ok(Self::Conditional {
            event,
            condition,
            probability: check_probability(probability)?,
        })
    }

    pub fn probability(&self) -> f64 {
        match self {
            Self::Marginal { probability, .. } | Self::Conditional { probability, .. } => {
                *probability
            }
        }
    }
    pub fn event_states(&self) -> &[StateId] {
        match self {
            Self::Marginal { event, .. } | Self::Conditional { event, .. } => &event.states,
        }
    }
    pub fn event_nodes(&self) -> &[NodeId] {
        match self {
            Self::Marginal { event, .. } | Self::Conditional { event, .. } => &event.nodes,
        }
    }
    pub fn condition_states(&self) -> &[StateId] {
        match self {
            Self::Marginal { .. } => &[],
            Self::Conditional { condition, .. } => &condition.states,
        }
    }
    pub fn condition_nodes(&self) -> &[NodeId] {
        match self {
            Self::Marginal { .. } => &[],
            Self::Conditional { condition, .. } => &condition.nodes,
        }
    }
    pub fn all_states(&self) -> Vec<StateId> {
        self.event_states()
            .iter()
            .chain(self.condition_states())
            .copied()
            .sorted_unstable()
            .collect()
    }
    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.event_nodes()
            .iter()
            .chain(self.condition_nodes())
            .copied()
            .sorted_unstable()
            .collect()
    }

    /// e.g. `P(SPRINKLER:T | RAIN:T) = 0.01`
    pub fn describe(&self, network: &Network) -> String {
        let list = |states: &[StateId]| {
            states
                .iter()
                .map(|s| network.describe_state(*s))
                .join(", ")
        };
        match self {
            Self::Marginal { event, probability } => {
                format!("P({}) = {}", list(&event.states), probability)
            }
            Self::Conditional {
                event,
                condition,
                probability,
            } => format!(
                "P({} | {}) = {}",
                list(&event.states),
                list(&condition.states),
                probability
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net() -> Network {
        let mut net = Network::new();
        for n in ["A", "B"] {
            let id = net.add_node(n).unwrap();
            net.add_state(id, "t").unwrap();
            net.add_state(id, "f").unwrap();
        }
        net
    }

    #[test]
    fn validation() {
        let net = net();
        let at = net.state("A", "t").unwrap();
        let af = net.state("A", "f").unwrap();
        let bt = net.state("B", "t").unwrap();
        assert!(matches!(
            ParameterConstraint::marginal(&net, [], 0.5),
            Err(ConstraintError::EmptyEvent)
        ));
        assert!(matches!(
            ParameterConstraint::marginal(&net, [at], 1.5),
            Err(ConstraintError::ProbabilityOutOfRange(_))
        ));
        assert!(matches!(
            ParameterConstraint::marginal(&net, [at, af], 0.5),
            Err(ConstraintError::RepeatedNode(_))
        ));
        assert!(matches!(
            ParameterConstraint::conditional(&net, [at], [af], 0.5),
            Err(ConstraintError::ConditionInEventNode(_))
        ));
        assert!(matches!(
            ParameterConstraint::marginal(&net, [99], 0.5),
            Err(ConstraintError::UnknownState(99))
        ));
        let c = ParameterConstraint::conditional(&net, [bt], [at], 0.25).unwrap();
        assert_eq!(c.all_states(), vec![at, bt]);
        assert_eq!(c.condition_nodes(), &[0]);
        assert_eq!(c.describe(&net), "P(B:t | A:t) = 0.25");
        let m = ParameterConstraint::conditional(&net, [bt], [], 0.25).unwrap();
        assert!(matches!(m, ParameterConstraint::Marginal { .. }));
    }
}
