//! IPFP solver loop.
//!
//! A cycle visits every registered constraint: the tree is propagated around the owning clique,
//! the constraint is applied, and the change is propagated again. The loss of a cycle is the sum
//! of the squared errors measured before each adjustment. The loop stops when the loss changes by
//! no more than the convergence threshold between two cycles, when the time limit is exceeded,
//! or after the cycle limit. Not converging is not an error: the report tells why the loop
//! stopped.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};

use crate::junction_tree::JunctionTree;
use crate::network::Network;
use crate::{BnError, Result};

#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Maximum number of cycles over all constraints.
    pub cycle_limit: u32,
    /// Wall-clock budget, checked at the start of every cycle.
    pub time_limit: Duration,
    /// Stop once the loss changes by at most this amount between two cycles.
    pub convergence_threshold: f64,
    /// Minimum delay between two progress log lines.
    pub log_interval: Duration,
    /// Display a progress bar over the cycles.
    pub show_progress: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            cycle_limit: 1000,
            time_limit: Duration::from_secs(60),
            convergence_threshold: 1e-12,
            log_interval: Duration::from_secs(1),
            show_progress: false,
        }
    }
}

impl SolverConfig {
    pub fn with_progress() -> Self {
        Self {
            show_progress: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_limit == 0 {
            return Err(BnError::InvalidConfig("cycle_limit"));
        }
        if self.time_limit.is_zero() {
            return Err(BnError::InvalidConfig("time_limit"));
        }
        if self.convergence_threshold.is_nan() || self.convergence_threshold <= 0.0 {
            return Err(BnError::InvalidConfig("convergence_threshold"));
        }
        if self.log_interval.is_zero() {
            return Err(BnError::InvalidConfig("log_interval"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    CycleLimit,
    TimeLimit,
}

#[derive(Clone, Debug)]
pub struct SolveReport {
    /// Number of completed cycles.
    pub cycles: u32,
    /// Loss of the last completed cycle.
    pub loss: f64,
    pub stop: StopReason,
    pub elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct Solver {
    config: SolverConfig,
}

fn progress_bar(config: &SolverConfig) -> ProgressBar {
    if !config.show_progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(config.cycle_limit as u64)
        .with_message("Fitting")
        .with_finish(ProgressFinish::AndClear);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] loss {prefix}")
    {
        pb.set_style(style);
    }
    pb
}

impl Solver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Fit `tree` to its registered constraints, then write the fitted tables onto `network`.
    ///
    /// Evidence set on the tree is cleared first.
    pub fn solve(&self, tree: &mut JunctionTree, network: &mut Network) -> Result<SolveReport> {
        let config = &self.config;
        let start = Instant::now();
        let mut last_log = start;
        tree.clear_evidence();
        let pb = progress_bar(config);
        let mut previous = f64::INFINITY;
        let mut loss = f64::INFINITY;
        let mut cycles = 0;
        let stop = loop {
            if cycles >= config.cycle_limit {
                break StopReason::CycleLimit;
            }
            if start.elapsed() >= config.time_limit {
                break StopReason::TimeLimit;
            }
            loss = 0.0;
            for constraint in 0..tree.n_constraints() {
                let clique = tree.constraint_clique(constraint)?;
                tree.propagate(clique)?;
                loss += tree.adjust_and_return_error(constraint)?;
            }
            cycles += 1;
            pb.inc(1);
            pb.set_prefix(format!("{loss:.3e}"));
            if last_log.elapsed() >= config.log_interval {
                tracing::info!(cycle = cycles, loss, "fitting");
                last_log = Instant::now();
            }
            if (previous - loss).abs() <= config.convergence_threshold {
                break StopReason::Converged;
            }
            previous = loss;
        };
        pb.finish_using_style();
        tree.write_tables_to_network(network)?;
        let report = SolveReport {
            cycles,
            loss,
            stop,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            cycles = report.cycles,
            loss = report.loss,
            stop = ?report.stop,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "fitting finished"
        );
        Ok(report)
    }
}
