//! Fitting of discrete Bayesian networks to probability constraints.
//!
//! A [`Network`] describes the nodes, their states and the directed edges. A set of
//! [`ParameterConstraint`]s states marginal (`P(a) = p`) or conditional (`P(a | b) = p`)
//! probabilities. The network is compiled into a [`JunctionTree`], whose clique tables are
//! fitted to the constraints with the Iterative Proportional Fitting Procedure (IPFP) and then
//! written back onto the per-node tables of the network. The fitted tree answers posterior
//! queries under evidence.
//!
//! ```no_run
//! use bnfit::{fit, Network, ParameterConstraint, SolverConfig};
//!
//! let mut net = Network::new();
//! let rain = net.add_node("RAIN").unwrap();
//! let rain_t = net.add_state(rain, "T").unwrap();
//! net.add_state(rain, "F").unwrap();
//! let constraints = vec![ParameterConstraint::marginal(&net, [rain_t], 0.2).unwrap()];
//! let (tree, report) = fit(&mut net, &constraints, &SolverConfig::default()).unwrap();
//! # let _ = (tree, report);
//! ```

pub mod compile;
pub mod constraint;
pub(crate) mod handler;
pub mod inference;
pub mod ipfp;
pub mod junction_tree;
pub mod network;
pub(crate) mod propagate;
pub mod solver;
pub mod table;

pub use compile::EliminationOrder;
pub use constraint::{ConstraintError, ParameterConstraint};
pub use junction_tree::{CliqueId, JunctionTree, SeparatorId, TableId};
pub use network::{Network, NetworkError, NodeId, StateId};
pub use solver::{SolveReport, Solver, SolverConfig, StopReason};
pub use table::{JunctionTable, ProbabilityTable, StateKey};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BnError>;

#[derive(Error, Debug)]
pub enum BnError {
    #[error("No slot for state combination {0:?}.")]
    InvalidKey(Vec<StateId>),
    #[error("NaN probability at slot {slot}.")]
    CorruptValue { slot: usize },
    #[error("Clique {clique} is not an endpoint of separator {separator}.")]
    NotSeparatorEndpoint {
        clique: CliqueId,
        separator: SeparatorId,
    },
    #[error("No clique holds the nodes {0:?}.")]
    NoOwningClique(Vec<NodeId>),
    #[error("Invalid solver configuration: {0} must be > 0.")]
    InvalidConfig(&'static str),
    #[error("Constraint {0} is not registered on this junction tree.")]
    UnknownConstraint(usize),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
}

/// Compile `network` into a junction tree, fit it to `constraints` and write the fitted
/// parameters back onto the network tables.
///
/// The returned tree stays calibrated and can answer evidence queries without solving again.
pub fn fit(
    network: &mut Network,
    constraints: &[ParameterConstraint],
    config: &SolverConfig,
) -> Result<(JunctionTree, SolveReport)> {
    let mut tree = JunctionTree::build(network, constraints)?;
    let report = Solver::new(config.clone())?.solve(&mut tree, network)?;
    Ok((tree, report))
}
