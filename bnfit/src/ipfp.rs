//! Iterative proportional fitting step for a single constraint.
//!
//! The slots of the owning clique table are split in three sets: the constraint slots
//! (matching every state of the constraint), the complement slots (the other slots matching the
//! condition) and, for conditional constraints, the condition slots (their union). An
//! adjustment rescales the constraint slots so that the event probability reaches the target,
//! and the complement slots so that the condition keeps its mass.

use itertools::{EitherOrBoth, Itertools};

use crate::constraint::ParameterConstraint;
use crate::junction_tree::JunctionTree;
use crate::table::JunctionTable;
use crate::Result;

/// Mass given to constraint slots stuck at zero while the target is not.
const LOCK_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub enum ConstraintHandler {
    Marginal {
        constraint_slots: Vec<usize>,
        complement_slots: Vec<usize>,
    },
    Conditional {
        condition_slots: Vec<usize>,
        constraint_slots: Vec<usize>,
        complement_slots: Vec<usize>,
    },
}

/// Elements of sorted `a` not in sorted `b`.
fn difference(a: &[usize], b: &[usize]) -> Vec<usize> {
    a.iter()
        .merge_join_by(b.iter(), |x, y| x.cmp(y))
        .filter_map(|x| {
            if let EitherOrBoth::Left(e) = x {
                Some(*e)
            } else {
                None
            }
        })
        .collect()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl ConstraintHandler {
    /// Resolve the slot sets of `constraint` on `table`, which must cover its nodes.
    pub fn new(constraint: &ParameterConstraint, table: &JunctionTable) -> Self {
        match constraint {
            ParameterConstraint::Marginal { event, .. } => {
                let constraint_slots = table.slots_matching(event.states());
                let all: Vec<usize> = (0..table.len()).collect();
                Self::Marginal {
                    complement_slots: difference(&all, &constraint_slots),
                    constraint_slots,
                }
            }
            ParameterConstraint::Conditional { condition, .. } => {
                let condition_slots = table.slots_matching(condition.states());
                let constraint_slots = table.slots_matching(&constraint.all_states());
                Self::Conditional {
                    complement_slots: difference(&condition_slots, &constraint_slots),
                    condition_slots,
                    constraint_slots,
                }
            }
        }
    }

    pub fn constraint_slots(&self) -> &[usize] {
        match self {
            Self::Marginal {
                constraint_slots, ..
            }
            | Self::Conditional {
                constraint_slots, ..
            } => constraint_slots,
        }
    }
    pub fn complement_slots(&self) -> &[usize] {
        match self {
            Self::Marginal {
                complement_slots, ..
            }
            | Self::Conditional {
                complement_slots, ..
            } => complement_slots,
        }
    }

    fn condition_probability(&self, table: &JunctionTable) -> f64 {
        match self {
            Self::Marginal { .. } => 1.0,
            Self::Conditional {
                condition_slots, ..
            } => table.sum_from_slots(condition_slots),
        }
    }

    /// Current probability of the event given the condition.
    pub fn event_probability(&self, table: &JunctionTable) -> f64 {
        ratio(
            table.sum_from_slots(self.constraint_slots()),
            self.condition_probability(table),
        )
    }

    /// Move `table` towards `target` and return the squared error measured before the move.
    pub fn adjust(&self, table: &mut JunctionTable, target: f64) -> f64 {
        let constraint_slots = self.constraint_slots();
        let complement_slots = self.complement_slots();
        let error = (self.event_probability(table) - target).powi(2);
        if target > 0.0
            && !constraint_slots.is_empty()
            && table.sum_from_slots(constraint_slots) == 0.0
        {
            tracing::warn!(slots = constraint_slots.len(), target, "breaking table lock");
            table.set_slots(constraint_slots, LOCK_EPSILON);
        }
        if target < 1.0
            && !complement_slots.is_empty()
            && table.sum_from_slots(complement_slots) == 0.0
        {
            tracing::warn!(
                slots = complement_slots.len(),
                target,
                "breaking complement table lock"
            );
            table.set_slots(complement_slots, LOCK_EPSILON);
        }
        // both ratios are taken against the condition mass before any rescaling
        let condition = self.condition_probability(table);
        let event = ratio(table.sum_from_slots(constraint_slots), condition);
        let complement = ratio(table.sum_from_slots(complement_slots), condition);
        table.adjust_by_ratio(constraint_slots, ratio(target, event));
        table.adjust_by_ratio(complement_slots, ratio(1.0 - target, complement));
        error
    }
}

impl JunctionTree {
    /// One IPFP step for registered constraint `constraint` on its owning clique, followed by a
    /// propagation when the clique was changed. Returns the squared error before the step.
    pub fn adjust_and_return_error(&mut self, constraint: usize) -> Result<f64> {
        let clique = self.constraint_clique(constraint)?;
        let table = self.cliques[clique].table();
        let error =
            self.handlers[constraint].adjust(&mut self.tables[table], self.targets[constraint]);
        if error > 0.0 {
            self.propagate(clique)?;
        }
        Ok(error)
    }

    /// Current error `(P(event | condition) - target)²` of a registered constraint.
    pub fn constraint_error(&self, constraint: usize) -> Result<f64> {
        let clique = self.constraint_clique(constraint)?;
        let p = self.handlers[constraint].event_probability(self.clique_table(clique));
        Ok((p - self.targets[constraint]).powi(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::table::ProbabilityTable;

    fn setup() -> (Network, JunctionTable) {
        let mut net = Network::new();
        let a = net.add_node("A").unwrap();
        let b = net.add_node("B").unwrap();
        for s in ["0", "1", "2"] {
            net.add_state(a, s).unwrap();
        }
        for s in ["0", "1"] {
            net.add_state(b, s).unwrap();
        }
        let mut t = ProbabilityTable::new(&net, vec![a, b], vec![]);
        t.fill_uniform();
        (net, JunctionTable::new(t))
    }

    #[test]
    fn marginal_reaches_target() {
        let (net, mut table) = setup();
        let a0 = net.state("A", "0").unwrap();
        let c = ParameterConstraint::marginal(&net, [a0], 0.7).unwrap();
        let handler = ConstraintHandler::new(&c, &table);
        assert_eq!(handler.constraint_slots(), &[0, 1]);
        assert_eq!(handler.complement_slots(), &[2, 3, 4, 5]);
        let mut error = 1.0;
        for _ in 0..5 {
            error = handler.adjust(&mut table, 0.7);
        }
        assert!(error < 1e-20);
        assert!((table.sum_over_states(&[a0]) - 0.7).abs() < 1e-12);
        assert!((table.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn conditional_preserves_condition_mass() {
        let (net, mut table) = setup();
        let a1 = net.state("A", "1").unwrap();
        let b0 = net.state("B", "0").unwrap();
        let c = ParameterConstraint::conditional(&net, [b0], [a1], 0.2).unwrap();
        let handler = ConstraintHandler::new(&c, &table);
        let error = handler.adjust(&mut table, 0.2);
        assert!((error - 0.09).abs() < 1e-12);
        let condition = table.sum_over_states(&[a1]);
        assert!((condition - 1.0 / 3.0).abs() < 1e-12);
        assert!((table.sum_over_states(&[a1, b0]) / condition - 0.2).abs() < 1e-12);
        assert!((handler.adjust(&mut table, 0.2)).abs() < 1e-20);
    }

    #[test]
    fn table_lock_is_broken() {
        let (net, mut table) = setup();
        let a2 = net.state("A", "2").unwrap();
        let slots = table.slots_matching(&[a2]);
        table.set_slots(&slots, 0.0);
        table.marginalize();
        let c = ParameterConstraint::marginal(&net, [a2], 0.5).unwrap();
        let handler = ConstraintHandler::new(&c, &table);
        let error = handler.adjust(&mut table, 0.5);
        assert!((error - 0.25).abs() < 1e-12);
        assert!((table.sum_over_states(&[a2]) - 0.5).abs() < 1e-12);
        assert!((table.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_target_empties_event() {
        let (net, mut table) = setup();
        let a2 = net.state("A", "2").unwrap();
        let c = ParameterConstraint::marginal(&net, [a2], 0.0).unwrap();
        let handler = ConstraintHandler::new(&c, &table);
        handler.adjust(&mut table, 0.0);
        assert_eq!(table.sum_over_states(&[a2]), 0.0);
        assert!((table.sum() - 1.0).abs() < 1e-12);
    }
}
