//! Service workload generators.

use dslab_core::context::SimulationContext;
use dyn_clone::{clone_trait_object, DynClone};
use erased_serde::serialize_trait_object;
use serde::Serialize;

use crate::error::{Error, Result};

/// A workload generator is a lazy, infinite, restartable source of arrival
/// bursts: each call yields the `(duration, arrival_rate)` of the next burst
/// of a service. The simulation context is passed in so that randomized
/// generators can draw from the replication RNG; deterministic generators
/// ignore it.
pub trait WorkloadGenerator: DynClone + erased_serde::Serialize {
    fn next_burst(&mut self, ctx: &SimulationContext) -> (f64, f64);
}

clone_trait_object!(WorkloadGenerator);
serialize_trait_object!(WorkloadGenerator);

/// Cyclic multistep workload: a fixed list of `(duration, arrival_rate)`
/// steps replayed forever.
#[derive(Clone, Serialize)]
pub struct MultistepWorkloadGenerator {
    durations: Vec<f64>,
    arrival_rates: Vec<f64>,
    next_idx: usize,
}

impl MultistepWorkloadGenerator {
    pub fn new(durations: Vec<f64>, arrival_rates: Vec<f64>) -> Result<Self> {
        if durations.is_empty() {
            return Err(Error::InvalidArgument(
                "workload must contain at least one step".to_string(),
            ));
        }
        if durations.len() != arrival_rates.len() {
            return Err(Error::InvalidArgument(
                "duration and arrival rate vectors have different sizes".to_string(),
            ));
        }
        if durations.iter().any(|&d| d <= 0.0) {
            return Err(Error::InvalidArgument(
                "workload step durations must be positive".to_string(),
            ));
        }
        if arrival_rates.iter().any(|&r| r < 0.0) {
            return Err(Error::InvalidArgument(
                "workload arrival rates must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            durations,
            arrival_rates,
            next_idx: 0,
        })
    }

    pub fn from_steps(steps: &[(f64, f64)]) -> Result<Self> {
        Self::new(
            steps.iter().map(|s| s.0).collect(),
            steps.iter().map(|s| s.1).collect(),
        )
    }
}

impl WorkloadGenerator for MultistepWorkloadGenerator {
    fn next_burst(&mut self, _ctx: &SimulationContext) -> (f64, f64) {
        let duration = self.durations[self.next_idx];
        let arrival_rate = self.arrival_rates[self.next_idx];
        self.next_idx = (self.next_idx + 1) % self.durations.len();
        (duration, arrival_rate)
    }
}
