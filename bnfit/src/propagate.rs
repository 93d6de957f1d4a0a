//! Collect/distribute message passing over the junction tree.
//!
//! A message through a separator projects the sending clique onto the separator, then rescales
//! the receiving clique by the ratio between the new and the stored separator values. Collecting
//! towards a root and then distributing from it leaves every separator consistent with both of
//! its cliques.

use ndarray::Array1;

use crate::junction_tree::{CliqueId, JunctionTree, SeparatorId};
use crate::{BnError, Result};

/// Separator values whose relative difference is within this are considered equal.
const MESSAGE_TOLERANCE: f64 = 1e-9;

/// Whether a separator slot moving from `old` to `new` must be sent, whatever the table scale.
fn changed(old: f64, new: f64) -> bool {
    (new - old).abs() > MESSAGE_TOLERANCE * old.abs().max(new.abs())
}

/// A clique reached by the tree walk, with the clique and separator it was reached from.
pub(crate) type WalkStep = (CliqueId, Option<(CliqueId, SeparatorId)>);

impl JunctionTree {
    /// Depth-first pre-order of the cliques from `root`.
    pub(crate) fn walk(&self, root: CliqueId) -> Vec<WalkStep> {
        let mut visited = vec![false; self.cliques.len()];
        let mut order = Vec::with_capacity(self.cliques.len());
        let mut stack: Vec<WalkStep> = vec![(root, None)];
        while let Some((clique, parent)) = stack.pop() {
            if std::mem::replace(&mut visited[clique], true) {
                continue;
            }
            order.push((clique, parent));
            for (n, s) in self.cliques[clique].neighbours.iter().rev() {
                if !visited[*n] {
                    stack.push((*n, Some((clique, *s))));
                }
            }
        }
        order
    }

    /// Sum of the clique on side `side` of `separator`, for every separator slot.
    fn project(&self, separator: SeparatorId, side: usize) -> Array1<f64> {
        let sep = &self.separators[separator];
        let clique_table = self.clique_table(sep.cliques()[side]);
        sep.projections[side]
            .iter()
            .map(|slots| clique_table.sum_from_slots(slots))
            .collect()
    }

    /// Send a message from clique `from` through `separator` to the clique on the other side.
    pub fn pass_message(&mut self, separator: SeparatorId, from: CliqueId) -> Result<()> {
        let side = self.separators[separator].side(from).ok_or(
            BnError::NotSeparatorEndpoint {
                clique: from,
                separator,
            },
        )?;
        let new = self.project(separator, side);
        let sep = &self.separators[separator];
        let far_table = self.cliques[sep.cliques()[1 - side]].table();
        let sep_table = sep.table();
        let ratios: Vec<(usize, f64)> = {
            let old = self.tables[sep_table].active();
            new.iter()
                .zip(old.iter())
                .enumerate()
                .filter(|(_, (new, old))| changed(**old, **new))
                .map(|(slot, (new, old))| (slot, if *old == 0.0 { 0.0 } else { new / old }))
                .collect()
        };
        let projections = &sep.projections[1 - side];
        let far = &mut self.tables[far_table];
        for (slot, ratio) in ratios {
            far.adjust_by_ratio(&projections[slot], ratio);
        }
        self.tables[sep_table].active_mut().assign(&new);
        Ok(())
    }

    /// Full collect/distribute pass centred on `root`.
    pub fn propagate(&mut self, root: CliqueId) -> Result<()> {
        let order = self.walk(root);
        for (clique, parent) in order.iter().rev() {
            if let Some((_, sep)) = parent {
                self.pass_message(*sep, *clique)?;
            }
        }
        for (_, parent) in order.iter() {
            if let Some((from, sep)) = parent {
                self.pass_message(*sep, *from)?;
            }
        }
        Ok(())
    }

    /// Propagate from the first leaf clique, if any.
    pub fn propagate_all(&mut self) -> Result<()> {
        match self.leaves().first().copied() {
            Some(root) => self.propagate(root),
            None => Ok(()),
        }
    }
}
