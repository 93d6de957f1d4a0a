//! Table handler: slot lookups, partial sums and in-place updates on junction tables.
//!
//! The per-state slot index is built once per table. All operations act on the table's active
//! array (the observed shadow array while evidence is set), in place.

use std::collections::HashMap;

use itertools::{EitherOrBoth, Itertools};
use ndarray::Array1;

use crate::network::StateId;
use crate::table::{JunctionTable, ProbabilityTable};

/// Sorted list of slots containing each state of a table's scope.
#[derive(Debug, Clone)]
pub(crate) struct SlotIndex {
    by_state: HashMap<StateId, Vec<usize>>,
    len: usize,
}

impl SlotIndex {
    pub(crate) fn new(table: &ProbabilityTable) -> Self {
        let mut by_state: HashMap<StateId, Vec<usize>> = HashMap::new();
        for (slot, key) in table.keys().enumerate() {
            for s in key.states() {
                by_state.entry(*s).or_default().push(slot);
            }
        }
        Self {
            by_state,
            len: table.len(),
        }
    }

    /// Slots whose configuration contains every state of `states`.
    /// No state means the whole table; a state outside the scope matches nothing.
    pub(crate) fn slots_matching(&self, states: &[StateId]) -> Vec<usize> {
        let mut lists = states.iter().map(|s| self.by_state.get(s));
        let Some(first) = lists.next() else {
            return (0..self.len).collect();
        };
        let Some(first) = first else {
            return Vec::new();
        };
        lists.fold(first.clone(), |acc, list| match list {
            None => Vec::new(),
            Some(list) => acc
                .iter()
                .merge_join_by(list.iter(), |x, y| x.cmp(y))
                .filter_map(|x| {
                    if let EitherOrBoth::Both(slot, _) = x {
                        Some(*slot)
                    } else {
                        None
                    }
                })
                .collect(),
        })
    }
}

impl JunctionTable {
    pub fn slots_matching(&self, states: &[StateId]) -> Vec<usize> {
        self.index.slots_matching(states)
    }

    pub fn sum_over_states(&self, states: &[StateId]) -> f64 {
        self.sum_from_slots(&self.slots_matching(states))
    }

    pub fn sum_from_slots(&self, slots: &[usize]) -> f64 {
        let values = self.active();
        slots.iter().map(|s| values[*s]).sum()
    }

    pub fn sum(&self) -> f64 {
        self.active().sum()
    }

    pub(crate) fn adjust_by_ratio(&mut self, slots: &[usize], ratio: f64) {
        let mut values = self.active_mut();
        for s in slots {
            values[*s] *= ratio;
        }
    }

    pub(crate) fn set_slots(&mut self, slots: &[usize], p: f64) {
        let mut values = self.active_mut();
        for s in slots {
            values[*s] = p;
        }
    }

    /// Normalize the active array to sum 1. A sum of 0 is kept as is rather than producing NaN.
    pub(crate) fn marginalize(&mut self) {
        let total = self.sum();
        if total != 0.0 && total != 1.0 {
            self.active_mut().mapv_inplace(|p| p / total);
        }
    }

    /// Enter (`observed = true`) or clear evidence.
    ///
    /// Entering evidence copies the slots consistent with the in-scope evidence states into the
    /// shadow array and zeroes the others. Evidence states outside the scope are ignored.
    pub(crate) fn set_observed(&mut self, evidence: &[StateId], observed: bool) {
        if !observed {
            self.observed = None;
            return;
        }
        let in_scope: Vec<StateId> = evidence
            .iter()
            .copied()
            .filter(|s| self.table.contains_state(*s))
            .collect();
        let values = self.table.values();
        let mut shadow = Array1::zeros(values.len());
        for slot in self.index.slots_matching(&in_scope) {
            shadow[slot] = values[slot];
        }
        self.observed = Some(shadow);
    }
}
