//! Dense probability tables.
//!
//! A table covers a scope of nodes, split in events (first) and conditions (last). Each joint
//! configuration of the scope has a slot in a flat array. Slots are enumerated as the Cartesian
//! product of the per-node state lists, in scope order, the last node varying fastest. The
//! bijection between configurations and slots is kept as an `IndexSet` of [`StateKey`]s, whose
//! position is the slot.

use indexmap::IndexSet;
use itertools::Itertools;
use ndarray::{Array1, ArrayView1, ArrayViewMut1};

use crate::handler::SlotIndex;
use crate::network::{Network, NodeId, StateId};
use crate::{BnError, Result};

/// Canonical form of a set of states: sorted, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(Box<[StateId]>);

impl StateKey {
    pub fn new(states: impl IntoIterator<Item = StateId>) -> Self {
        let mut states: Vec<StateId> = states.into_iter().collect();
        states.sort_unstable();
        states.dedup();
        Self(states.into_boxed_slice())
    }
    pub fn states(&self) -> &[StateId] {
        &self.0
    }
    pub fn contains(&self, state: StateId) -> bool {
        self.0.binary_search(&state).is_ok()
    }
}

impl FromIterator<StateId> for StateKey {
    fn from_iter<I: IntoIterator<Item = StateId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[derive(Debug, Clone)]
pub struct ProbabilityTable {
    /// events first, then conditions
    scope: Vec<NodeId>,
    n_events: usize,
    /// state list of every scope node, in scope order
    states: Vec<Vec<StateId>>,
    index: IndexSet<StateKey>,
    values: Array1<f64>,
}

impl ProbabilityTable {
    /// New table over `events` ∪ `conditions`, filled with 1.0.
    pub fn new(network: &Network, events: Vec<NodeId>, conditions: Vec<NodeId>) -> Self {
        let n_events = events.len();
        let scope: Vec<NodeId> = events.into_iter().chain(conditions).collect();
        let states: Vec<Vec<StateId>> = scope
            .iter()
            .map(|n| network.node(*n).states().to_vec())
            .collect();
        // multi_cartesian_product of no iterator at all is a single empty configuration
        let index: IndexSet<StateKey> = if states.is_empty() {
            std::iter::once(StateKey::new([])).collect()
        } else {
            states
                .iter()
                .map(|l| l.iter().copied())
                .multi_cartesian_product()
                .map(StateKey::new)
                .collect()
        };
        let values = Array1::ones(index.len());
        Self {
            scope,
            n_events,
            states,
            index,
            values,
        }
    }

    /// Uniform network table of `node`: `P(node | parents)` or `P(node)` for a root.
    pub fn for_node(network: &Network, node: NodeId) -> Self {
        let parents = network.node(node).parents().to_vec();
        let mut table = Self::new(network, vec![node], parents);
        table.fill_uniform();
        table.normalize_conditional();
        table
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn scope(&self) -> &[NodeId] {
        &self.scope
    }
    pub fn events(&self) -> &[NodeId] {
        &self.scope[..self.n_events]
    }
    pub fn conditions(&self) -> &[NodeId] {
        &self.scope[self.n_events..]
    }
    pub fn is_conditional(&self) -> bool {
        self.n_events < self.scope.len()
    }
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.scope.contains(&node)
    }
    /// Whether `state` belongs to one of the scope nodes.
    pub fn contains_state(&self, state: StateId) -> bool {
        self.states.iter().any(|l| l.contains(&state))
    }
    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.index.iter()
    }
    pub fn key(&self, slot: usize) -> &StateKey {
        &self.index[slot]
    }
    pub fn slot(&self, states: &[StateId]) -> Result<usize> {
        self.index
            .get_index_of(&StateKey::new(states.iter().copied()))
            .ok_or_else(|| BnError::InvalidKey(states.to_vec()))
    }
    /// Restriction of `key` to the states of this table's scope.
    pub fn project_key(&self, key: &StateKey) -> StateKey {
        key.states()
            .iter()
            .copied()
            .filter(|s| self.contains_state(*s))
            .collect()
    }

    pub fn probability(&self, states: &[StateId]) -> Result<f64> {
        let slot = self.slot(states)?;
        let p = self.values[slot];
        if p.is_nan() {
            return Err(BnError::CorruptValue { slot });
        }
        Ok(p)
    }
    pub fn set_probability(&mut self, states: &[StateId], p: f64) -> Result<()> {
        let slot = self.slot(states)?;
        if p.is_nan() {
            return Err(BnError::CorruptValue { slot });
        }
        self.values[slot] = p;
        Ok(())
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }
    pub(crate) fn values_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.values.view_mut()
    }

    pub fn fill_uniform(&mut self) {
        if !self.is_empty() {
            let p = 1.0 / self.len() as f64;
            self.values.fill(p);
        }
    }

    /// Number of consecutive slots sharing the same event configuration, i.e. the number of
    /// condition configurations.
    fn condition_block(&self) -> usize {
        self.states[self.n_events..].iter().map(Vec::len).product()
    }

    /// Normalize the events for every condition configuration. Configurations whose total is
    /// zero are left untouched.
    pub fn normalize_conditional(&mut self) {
        let block = self.condition_block();
        if block == 0 {
            return;
        }
        let mut totals = vec![0.0; block];
        for (slot, p) in self.values.iter().enumerate() {
            totals[slot % block] += *p;
        }
        for (slot, p) in self.values.iter_mut().enumerate() {
            let t = totals[slot % block];
            if t != 0.0 {
                *p /= t;
            }
        }
    }
}

/// Pointer from every slot of a junction table to the matching slot of an absorbed network
/// table.
#[derive(Debug, Clone)]
pub(crate) struct TablePointer {
    pub(crate) node: NodeId,
    pub(crate) slots: Vec<usize>,
}

/// Table of a clique or separator of a junction tree.
///
/// While evidence is set, the observed shadow array replaces the main array for every read and
/// write done through the handler operations.
#[derive(Debug, Clone)]
pub struct JunctionTable {
    pub(crate) table: ProbabilityTable,
    pub(crate) observed: Option<Array1<f64>>,
    pub(crate) index: SlotIndex,
    pub(crate) pointers: Vec<TablePointer>,
}

impl JunctionTable {
    pub fn new(table: ProbabilityTable) -> Self {
        let index = SlotIndex::new(&table);
        Self {
            table,
            observed: None,
            index,
            pointers: Vec::new(),
        }
    }
    pub fn table(&self) -> &ProbabilityTable {
        &self.table
    }
    pub fn len(&self) -> usize {
        self.table.len()
    }
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
    pub fn is_observed(&self) -> bool {
        self.observed.is_some()
    }
    /// Array currently read and written: the shadow array while observed, else the main one.
    pub fn active(&self) -> ArrayView1<'_, f64> {
        match &self.observed {
            Some(obs) => obs.view(),
            None => self.table.values(),
        }
    }
    pub(crate) fn active_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        match &mut self.observed {
            Some(obs) => obs.view_mut(),
            None => self.table.values_mut(),
        }
    }
}
