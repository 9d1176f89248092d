//! Experiment options.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Strategy used to select the coalition structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoalitionFormationPolicy {
    NashStable,
}

impl Display for CoalitionFormationPolicy {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CoalitionFormationPolicy::NashStable => write!(f, "nash"),
        }
    }
}

/// Strategy used to divide a coalition's value among its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayoffDivisionPolicy {
    Shapley,
}

impl Display for PayoffDivisionPolicy {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PayoffDivisionPolicy::Shapley => write!(f, "shapley"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Options {
    pub coalition_formation: CoalitionFormationPolicy,
    /// Simulated time between two activations of the coalition formation
    /// algorithm.
    pub coalition_formation_interval: f64,
    pub coalition_value_division: PayoffDivisionPolicy,
    /// Report every Nash-stable partition instead of the best one only.
    pub find_all_best_partitions: bool,
    /// Relative optimality tolerance handed to the placement solver.
    pub optim_relative_tolerance: f64,
    /// Wall-clock limit (seconds) per placement solve; non-positive means
    /// unlimited.
    pub optim_time_limit: f64,
    pub output_stats_data_file: Option<String>,
    pub output_trace_data_file: Option<String>,
    pub rng_seed: u64,
    /// Relative tolerance used by the service performance model.
    pub service_delay_tolerance: f64,
    /// Confidence level of the cross-replication interval estimators.
    pub sim_ci_level: f64,
    /// Target relative precision of the confidence interval half-width.
    pub sim_ci_rel_precision: f64,
    /// Maximum number of replications; 0 means unlimited.
    pub sim_max_num_replications: usize,
    /// Maximum simulated duration of one replication.
    pub sim_max_replication_duration: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            coalition_formation: CoalitionFormationPolicy::NashStable,
            coalition_formation_interval: 0.0,
            coalition_value_division: PayoffDivisionPolicy::Shapley,
            find_all_best_partitions: false,
            optim_relative_tolerance: 0.0,
            optim_time_limit: -1.0,
            output_stats_data_file: None,
            output_trace_data_file: None,
            rng_seed: 5489,
            service_delay_tolerance: 1e-5,
            sim_ci_level: 0.95,
            sim_ci_rel_precision: 0.04,
            sim_max_num_replications: 0,
            sim_max_replication_duration: 0.0,
        }
    }
}

impl Display for Options {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "coalition-formation: {}, coalition-formation-interval: {}, \
             coalition-value-division: {}, find-all-best-partitions: {}, \
             optim-relative-tolerance: {}, optim-time-limit: {}, \
             output-stats-data-file: {:?}, output-trace-data-file: {:?}, \
             rng-seed: {}, service-delay-tolerance: {}, sim-ci-level: {}, \
             sim-ci-relative-precision: {}, sim-max-num-replications: {}, \
             sim-max-replication-duration: {}",
            self.coalition_formation,
            self.coalition_formation_interval,
            self.coalition_value_division,
            self.find_all_best_partitions,
            self.optim_relative_tolerance,
            self.optim_time_limit,
            self.output_stats_data_file,
            self.output_trace_data_file,
            self.rng_seed,
            self.service_delay_tolerance,
            self.sim_ci_level,
            self.sim_ci_rel_precision,
            self.sim_max_num_replications,
            self.sim_max_replication_duration
        )
    }
}
