//! Simulation-scoped experiment control: runs independent replications of
//! the fog simulation and stops on confidence-interval precision.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};
use sugars::{rc, refcell};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::output::{StatsWriter, TraceWriter};
use crate::scenario::{IdentityTables, Scenario};
use crate::simulation::FogSimulation;
use crate::statistics::CiMeanEstimator;

pub struct Experiment {
    scenario: Rc<Scenario>,
    options: Rc<Options>,
    tables: Rc<IdentityTables>,
    fp_coal_profit_ci_stats: Vec<CiMeanEstimator>,
    fp_alone_profit_ci_stats: Vec<CiMeanEstimator>,
    stats_writer: Option<Rc<RefCell<StatsWriter>>>,
    trace_writer: Option<Rc<RefCell<TraceWriter>>>,
    num_replications: usize,
}

impl Experiment {
    pub fn new(scenario: Scenario, options: Options) -> Result<Self> {
        validate_options(&options)?;

        let tables = IdentityTables::build(&scenario);

        let mut fp_coal_profit_ci_stats = Vec::with_capacity(scenario.num_fps);
        let mut fp_alone_profit_ci_stats = Vec::with_capacity(scenario.num_fps);
        for fp in 0..scenario.num_fps {
            let mut coal = CiMeanEstimator::new(options.sim_ci_level, options.sim_ci_rel_precision);
            coal.set_name(&format!("CoalitionProfit_{{{}}}", fp));
            fp_coal_profit_ci_stats.push(coal);
            let mut alone = CiMeanEstimator::new(options.sim_ci_level, options.sim_ci_rel_precision);
            alone.set_name(&format!("AloneProfit_{{{}}}", fp));
            fp_alone_profit_ci_stats.push(alone);
        }

        let stats_writer = match &options.output_stats_data_file {
            Some(path) => Some(rc!(refcell!(StatsWriter::create(path, scenario.num_fps)?))),
            None => None,
        };
        let trace_writer = match &options.output_trace_data_file {
            Some(path) => Some(rc!(refcell!(TraceWriter::create(path, scenario.num_fps)?))),
            None => None,
        };

        Ok(Self {
            scenario: rc!(scenario),
            options: rc!(options),
            tables: rc!(tables),
            fp_coal_profit_ci_stats,
            fp_alone_profit_ci_stats,
            stats_writer,
            trace_writer,
            num_replications: 0,
        })
    }

    pub fn num_replications(&self) -> usize {
        self.num_replications
    }

    /// Runs replications until every per-provider coalition-profit interval
    /// is precise enough (or declared unstable), or the replication budget
    /// is exhausted. Output files are finalized even when a replication
    /// fails.
    pub fn run(&mut self) -> Result<()> {
        info!("scenario: {}", self.scenario);
        info!("options: {}", self.options);

        let outcome = self.run_replications();
        let finalized = self.finalize();
        outcome.and(finalized)
    }

    fn run_replications(&mut self) -> Result<()> {
        while !self.end_of_simulation() {
            // Derive a distinct deterministic seed per replication so that
            // replications are independent but the whole run reproduces.
            let seed = self
                .options
                .rng_seed
                .wrapping_add(self.num_replications as u64);
            let mut replication = FogSimulation::new(
                seed,
                self.scenario.clone(),
                self.options.clone(),
                self.tables.clone(),
                self.stats_writer.clone(),
                self.trace_writer.clone(),
            )?;
            replication.run(self.options.sim_max_replication_duration)?;
            self.num_replications += 1;

            let coal_estimates = replication.coalition_profit_estimates();
            let alone_estimates = replication.alone_profit_estimates();
            for fp in 0..self.scenario.num_fps {
                self.fp_coal_profit_ci_stats[fp].collect(coal_estimates[fp]);
                self.fp_alone_profit_ci_stats[fp].collect(alone_estimates[fp]);
            }

            info!(
                "replication #{} finished at simulated time {:.3} ({} events)",
                self.num_replications,
                replication.time(),
                replication.event_count()
            );
            debug!(
                "replication #{}: coalition profits {:?}, alone profits {:?}",
                self.num_replications, coal_estimates, alone_estimates
            );
            self.log_ci_summary();
        }
        Ok(())
    }

    fn end_of_simulation(&self) -> bool {
        let max_reps = self.options.sim_max_num_replications;
        if max_reps > 0 && self.num_replications >= max_reps {
            return true;
        }
        self.num_replications > 0 && check_stats(&self.fp_coal_profit_ci_stats)
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = &self.stats_writer {
            writer.borrow_mut().flush()?;
        }
        if let Some(writer) = &self.trace_writer {
            writer.borrow_mut().flush()?;
        }

        info!("simulation ended after {} replication(s)", self.num_replications);
        self.log_ci_summary();
        Ok(())
    }

    fn log_ci_summary(&self) {
        for fp in 0..self.scenario.num_fps {
            for stat in [
                &self.fp_coal_profit_ci_stats[fp],
                &self.fp_alone_profit_ci_stats[fp],
            ] {
                info!(
                    "{}: {} (s.d. {}) [{}, {}] (rel. prec.: {}, size: {})",
                    stat.name(),
                    stat.estimate(),
                    stat.standard_deviation(),
                    stat.lower(),
                    stat.upper(),
                    stat.relative_precision(),
                    stat.size()
                );
            }
        }
    }
}

fn check_stats(stats: &[CiMeanEstimator]) -> bool {
    stats.iter().all(|s| s.done() || s.unstable())
}

fn validate_options(options: &Options) -> Result<()> {
    if options.coalition_formation_interval <= 0.0 {
        return Err(Error::InvalidArgument(
            "coalition formation interval must be positive".to_string(),
        ));
    }
    if options.sim_max_replication_duration <= 0.0 {
        return Err(Error::InvalidArgument(
            "maximum replication duration must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.optim_relative_tolerance) {
        return Err(Error::InvalidArgument(
            "optimizer relative tolerance must lie in [0, 1]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.service_delay_tolerance) {
        return Err(Error::InvalidArgument(
            "service delay tolerance must lie in [0, 1]".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&options.sim_ci_level) || options.sim_ci_level == 0.0 {
        return Err(Error::InvalidArgument(
            "confidence level must lie in (0, 1)".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.sim_ci_rel_precision) {
        return Err(Error::InvalidArgument(
            "confidence interval relative precision must lie in [0, 1]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> Options {
        Options {
            coalition_formation_interval: 100.0,
            sim_max_replication_duration: 100.0,
            sim_max_num_replications: 1,
            ..Options::default()
        }
    }

    #[test]
    fn test_option_validation() {
        let scenario_text = r#"
num_fps = 1
num_fn_categories = 1
num_svc_categories = 1
num_vm_categories = 1
svc.max_delays = [1.0]
svc.vm_categories = [0]
svc.vm_service_rates = [10]
svc.workloads = [ [ [100 5] ] ]
fp.num_svcs = [ [1] ]
fp.num_fns = [ [1] ]
fp.electricity_costs = [0.1]
fp.coalition_costs = [0]
fp.svc_revenues = [ [5] ]
fp.svc_penalties = [ [10] ]
fp.fn_asleep_costs = [ [0.01] ]
fp.fn_awake_costs = [ [0.02] ]
fn.min_powers = [0.1]
fn.max_powers = [0.2]
vm.cpu_requirements = [ [0.5] ]
vm.ram_requirements = [ [0.5] ]
"#;
        let scenario = crate::scenario::Scenario::from_str_named(scenario_text, "inline").unwrap();

        let mut options = base_options();
        options.coalition_formation_interval = 0.0;
        assert!(Experiment::new(scenario.clone(), options).is_err());

        let mut options = base_options();
        options.sim_ci_level = 1.5;
        assert!(Experiment::new(scenario.clone(), options).is_err());

        assert!(Experiment::new(scenario, base_options()).is_ok());
    }
}
