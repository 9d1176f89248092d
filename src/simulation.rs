//! Per-replication simulation driver.
//!
//! [`FogSimulation`] wires one coalition manager component into a fresh
//! `dslab-core` simulation; the manager reacts to workload bursts and
//! periodic coalition formation triggers, invoking the placement solver and
//! the game-theoretic machinery from inside the event loop.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use dslab_core::context::SimulationContext;
use dslab_core::simulation::Simulation;
use dslab_core::{cast, Event, EventHandler};
use log::{debug, error, info};
use sugars::{rc, refcell};

use crate::coalition_formation::{
    CoalitionFormationInfo, CoalitionInfo, NashStablePartitionSelector, PartitionInfo,
};
use crate::combinatorics::LexicographicSubset;
use crate::error::{Error, Result};
use crate::events::formation::CoalitionFormationTrigger;
use crate::events::workload::{ArrivalBurstStart, ArrivalBurstStop};
use crate::game::{find_core, shapley_value, CoalitionId, CooperativeGame};
use crate::mmc::MmcQueue;
use crate::options::{CoalitionFormationPolicy, Options};
use crate::output::{StatsWriter, TraceWriter};
use crate::scenario::{IdentityTables, Scenario};
use crate::statistics::MeanEstimator;
use crate::vm_allocation_solver::{
    OptimalVmAllocationSolver, VmAllocationProblem, VmAllocationSolver,
};
use crate::workload::{MultistepWorkloadGenerator, WorkloadGenerator};

/// An arrival burst: `(start_time, stop_time, arrival_rate)`.
type Burst = (f64, f64, f64);

/// The component owning all replication-scoped state: workload generators,
/// per-service burst lists, FN power states and per-provider profit
/// estimators. It handles every event of the simulation.
pub struct CoalitionManager {
    scenario: Rc<Scenario>,
    options: Rc<Options>,
    tables: Rc<IdentityTables>,
    wkl_gens: Vec<Box<dyn WorkloadGenerator>>,
    svc_bursts: Vec<Vec<Burst>>,
    fn_power_states: Vec<bool>,
    rep_coal_profit_stats: Vec<MeanEstimator>,
    rep_alone_profit_stats: Vec<MeanEstimator>,
    stats_writer: Option<Rc<RefCell<StatsWriter>>>,
    trace_writer: Option<Rc<RefCell<TraceWriter>>>,
    solver: OptimalVmAllocationSolver,
    selector: NashStablePartitionSelector,
    failure: Option<Error>,
    ctx: SimulationContext,
}

impl CoalitionManager {
    pub fn new(
        scenario: Rc<Scenario>,
        options: Rc<Options>,
        tables: Rc<IdentityTables>,
        stats_writer: Option<Rc<RefCell<StatsWriter>>>,
        trace_writer: Option<Rc<RefCell<TraceWriter>>>,
        ctx: SimulationContext,
    ) -> Result<Self> {
        let mut wkl_gens: Vec<Box<dyn WorkloadGenerator>> = Vec::new();
        for steps in &scenario.svc_workloads {
            wkl_gens.push(Box::new(MultistepWorkloadGenerator::from_steps(steps)?));
        }

        let num_fps = scenario.num_fps;
        let solver =
            OptimalVmAllocationSolver::new(options.optim_relative_tolerance, options.optim_time_limit);
        Ok(Self {
            svc_bursts: vec![Vec::new(); tables.num_svcs()],
            fn_power_states: vec![true; tables.num_fns()],
            rep_coal_profit_stats: vec![MeanEstimator::new(); num_fps],
            rep_alone_profit_stats: vec![MeanEstimator::new(); num_fps],
            stats_writer,
            trace_writer,
            solver,
            selector: NashStablePartitionSelector::default(),
            failure: None,
            scenario,
            options,
            tables,
            wkl_gens,
            ctx,
        })
    }

    /// Schedules the initial events of one replication: a first arrival
    /// burst per service at time zero and the first coalition formation
    /// trigger one interval later.
    pub fn schedule_initial_events(&mut self) {
        for svc in 0..self.tables.num_svcs() {
            let svc_cat = self.tables.svc_categories[svc];
            let (duration, arrival_rate) = self.wkl_gens[svc_cat].next_burst(&self.ctx);
            self.ctx.emit_self(
                ArrivalBurstStart {
                    service: svc,
                    duration,
                    arrival_rate,
                },
                0.0,
            );
        }
        let interval = self.options.coalition_formation_interval;
        self.ctx.emit_self(
            CoalitionFormationTrigger {
                start_time: self.ctx.time(),
                stop_time: self.ctx.time() + interval,
            },
            interval,
        );
    }

    /// Per-provider mean coalition profit over the replication's triggers.
    pub fn coalition_profit_estimates(&self) -> Vec<f64> {
        self.rep_coal_profit_stats.iter().map(|s| s.estimate()).collect()
    }

    /// Per-provider mean alone profit over the replication's triggers.
    pub fn alone_profit_estimates(&self) -> Vec<f64> {
        self.rep_alone_profit_stats.iter().map(|s| s.estimate()).collect()
    }

    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    fn on_arrival_burst_start(&mut self, service: usize, duration: f64, arrival_rate: f64) {
        debug!(
            "[{:.3}] burst start for service {}: rate {} for {}",
            self.ctx.time(),
            service,
            arrival_rate,
            duration
        );
        let start = self.ctx.time();
        self.svc_bursts[service].push((start, start + duration, arrival_rate));
        self.ctx.emit_self(ArrivalBurstStop { service }, duration);
    }

    fn on_arrival_burst_stop(&mut self, service: usize) {
        debug!("[{:.3}] burst stop for service {}", self.ctx.time(), service);
        let svc_cat = self.tables.svc_categories[service];
        let (duration, arrival_rate) = self.wkl_gens[svc_cat].next_burst(&self.ctx);
        self.ctx.emit_self(
            ArrivalBurstStart {
                service,
                duration,
                arrival_rate,
            },
            0.0,
        );
    }

    fn on_coalition_formation_trigger(&mut self, start_time: f64, stop_time: f64) {
        debug!(
            "[{:.3}] coalition formation trigger over [{}, {}]",
            self.ctx.time(),
            start_time,
            stop_time
        );
        if let Err(e) = self.analyze_coalitions(start_time, stop_time) {
            error!("coalition formation failed: {}", e);
            self.failure = Some(e);
            return;
        }

        let interval = self.options.coalition_formation_interval;
        self.ctx.emit_self(
            CoalitionFormationTrigger {
                start_time: self.ctx.time(),
                stop_time: self.ctx.time() + interval,
            },
            interval,
        );
    }

    /// The coalition formation engine: sizes every service for the peak rate
    /// seen over the elapsed interval, scores every non-empty coalition of
    /// providers through the placement solver, divides coalition values with
    /// the Shapley value and keeps the Nash-stable partitions.
    fn analyze_coalitions(&mut self, start_time: f64, stop_time: f64) -> Result<()> {
        let scenario = self.scenario.clone();
        let tables = self.tables.clone();
        let num_fps = scenario.num_fps;
        let duration = stop_time - start_time;

        let (svc_predicted_delays, vm_svcs) = self.size_services(start_time, stop_time)?;

        let mut game = CooperativeGame::new(num_fps);
        let mut visited: BTreeMap<CoalitionId, CoalitionInfo> = BTreeMap::new();
        let mut alone_profits = vec![f64::NAN; num_fps];
        let mut coal_profits = vec![f64::NAN; num_fps];

        let fps: Vec<usize> = (0..num_fps).collect();
        let mut subset = LexicographicSubset::new(num_fps, false)?;
        loop {
            let coal_fps = subset.apply(&fps)?;
            let cid = CoalitionId::from_players(coal_fps.iter().copied());

            let mut coal_fns = Vec::new();
            let mut coal_svcs = Vec::new();
            let mut coal_vms = Vec::new();
            for &fp in &coal_fps {
                for fn_idx in 0..tables.num_fns() {
                    if tables.fn_to_fps[fn_idx] == fp {
                        coal_fns.push(fn_idx);
                    }
                }
                for svc in 0..tables.num_svcs() {
                    if tables.svc_to_fps[svc] == fp {
                        coal_svcs.push(svc);
                        for (vm, &vm_svc) in vm_svcs.iter().enumerate() {
                            if vm_svc == svc {
                                coal_vms.push(vm);
                            }
                        }
                    }
                }
            }

            let problem = VmAllocationProblem {
                fns: &coal_fns,
                vms: &coal_vms,
                fn_to_fps: &tables.fn_to_fps,
                fn_categories: &tables.fn_categories,
                fn_power_states: &self.fn_power_states,
                fn_min_powers: &scenario.fn_min_powers,
                fn_max_powers: &scenario.fn_max_powers,
                vm_to_svcs: &vm_svcs,
                svc_vm_categories: &scenario.svc_vm_categories,
                vm_cpu_requirements: &scenario.vm_cpu_requirements,
                vm_ram_requirements: &scenario.vm_ram_requirements,
                svc_to_fps: &tables.svc_to_fps,
                svc_categories: &tables.svc_categories,
                svc_max_delays: &scenario.svc_max_delays,
                svc_predicted_delays: &svc_predicted_delays,
                fp_svc_penalties: &scenario.fp_svc_penalties,
                fp_electricity_costs: &scenario.fp_electricity_costs,
                fp_fn_asleep_costs: &scenario.fp_fn_asleep_costs,
                fp_fn_awake_costs: &scenario.fp_fn_awake_costs,
            };
            let vm_alloc = self.solver.solve(&problem);

            let mut info = CoalitionInfo {
                vm_allocation: vm_alloc,
                ..CoalitionInfo::default()
            };
            if info.vm_allocation.solved {
                let revenue: f64 = coal_svcs
                    .iter()
                    .map(|&svc| {
                        scenario.fp_svc_revenues[tables.svc_to_fps[svc]][tables.svc_categories[svc]]
                    })
                    .sum();
                let mut cost = info.vm_allocation.objective_value;
                // The administration fee is charged per member once the
                // coalition is non-trivial; it is paid back from the cost
                // basis so singletons and multi-FP coalitions are scored on
                // the same footing.
                if coal_fps.len() > 1 {
                    for &fp in &coal_fps {
                        cost -= scenario.fp_coalition_costs[fp];
                    }
                }
                let profit = (revenue - cost) * duration;
                game.set_value(cid, profit);
                info.value = profit;
                if coal_fps.len() == 1 {
                    alone_profits[coal_fps[0]] = profit;
                }
                debug!(
                    "coalition {}: objective {} -> value {}",
                    cid, info.vm_allocation.objective_value, profit
                );

                let subgame = game.subgame(&coal_fps);
                let core = find_core(&subgame);
                info.core_empty = core.is_empty();
                if info.core_empty && coal_fps.len() == num_fps {
                    debug!("the grand coalition has an empty core");
                }
                let payoffs = shapley_value(&subgame)?;
                if !info.core_empty {
                    info.payoffs_in_core = core.belongs_to_core(&payoffs);
                }
                info.payoffs = payoffs;
            } else {
                game.set_value(cid, f64::NEG_INFINITY);
                info.value = f64::NEG_INFINITY;
                if coal_fps.len() == num_fps {
                    info!("the grand coalition placement is infeasible");
                } else {
                    debug!("coalition {} placement is infeasible", cid);
                }
            }
            visited.insert(cid, info);

            if !subset.has_next() {
                break;
            }
            subset.advance()?;
        }

        let best_partitions = match self.options.coalition_formation {
            CoalitionFormationPolicy::NashStable => self.selector.select(&game, &visited)?,
        };
        let formed = CoalitionFormationInfo {
            coalitions: visited,
            best_partitions,
        };

        let timestamp = self.ctx.time();
        if self.options.find_all_best_partitions {
            // Average per-provider profits across every stable partition and
            // trace each of them.
            let mut aux_stats = vec![MeanEstimator::new(); num_fps];
            for partition in &formed.best_partitions {
                let mut part_profits = vec![f64::NAN; num_fps];
                for (&fp, &payoff) in &partition.payoffs {
                    part_profits[fp] = payoff;
                    aux_stats[fp].collect(payoff);
                }
                self.write_trace_row(
                    timestamp,
                    start_time,
                    duration,
                    partition,
                    &alone_profits,
                    &part_profits,
                )?;
            }
            for fp in 0..num_fps {
                coal_profits[fp] = aux_stats[fp].estimate();
            }
        } else {
            let mut max_partition = PartitionInfo::default();
            for partition in &formed.best_partitions {
                if partition.value > max_partition.value {
                    max_partition = partition.clone();
                }
            }
            for (&fp, &payoff) in &max_partition.payoffs {
                coal_profits[fp] = payoff;
            }
            self.write_trace_row(
                timestamp,
                start_time,
                duration,
                &max_partition,
                &alone_profits,
                &coal_profits,
            )?;
        }

        debug!(
            "interval [{}, {}]: coalition profits {:?}, alone profits {:?}",
            start_time, stop_time, coal_profits, alone_profits
        );

        for fp in 0..num_fps {
            self.rep_coal_profit_stats[fp].collect(coal_profits[fp]);
            self.rep_alone_profit_stats[fp].collect(alone_profits[fp]);
        }

        if let Some(writer) = &self.stats_writer {
            writer.borrow_mut().write_row(
                timestamp,
                start_time,
                duration,
                &coal_profits,
                &alone_profits,
            )?;
        }
        Ok(())
    }

    /// Extracts the per-service peak arrival rate over the elapsed interval,
    /// prunes bursts that ended before it, and sizes every service with the
    /// M/M/c model. Returns the per-service delay tables and the flattened
    /// VM-to-service mapping.
    fn size_services(&mut self, start_time: f64, stop_time: f64) -> Result<(Vec<Vec<f64>>, Vec<usize>)> {
        let mut svc_predicted_delays = Vec::with_capacity(self.tables.num_svcs());
        let mut vm_svcs = Vec::new();
        for svc in 0..self.tables.num_svcs() {
            let svc_cat = self.tables.svc_categories[svc];

            let mut max_rate: f64 = 0.0;
            let bursts = &mut self.svc_bursts[svc];
            let mut b = 0;
            while b < bursts.len() {
                let (burst_start, burst_stop, rate) = bursts[b];
                if burst_stop <= start_time {
                    // Ended before this interval.
                    bursts.remove(b);
                } else if burst_start < stop_time {
                    max_rate = max_rate.max(rate);
                    if burst_stop < stop_time {
                        // Fully elapsed; no longer relevant for the next one.
                        bursts.remove(b);
                    } else {
                        b += 1;
                    }
                } else {
                    // Starts in a later interval.
                    break;
                }
            }

            let mut model = MmcQueue::new(
                max_rate,
                self.scenario.svc_vm_service_rates[svc_cat],
                self.scenario.svc_max_delays[svc_cat],
                self.options.service_delay_tolerance,
            )?;
            let min_num_vms = model.compute_queue_parameters()?;
            debug!(
                "service {}: peak rate {} -> {} VMs (predicted delay {})",
                svc,
                max_rate,
                min_num_vms,
                model.delay(min_num_vms)
            );
            svc_predicted_delays.push(model.delays());
            vm_svcs.extend(std::iter::repeat(svc).take(min_num_vms));
        }
        Ok((svc_predicted_delays, vm_svcs))
    }

    fn write_trace_row(
        &self,
        timestamp: f64,
        start_time: f64,
        duration: f64,
        partition: &PartitionInfo,
        alone_profits: &[f64],
        coalition_profits: &[f64],
    ) -> Result<()> {
        if let Some(writer) = &self.trace_writer {
            writer.borrow_mut().write_row(
                timestamp,
                start_time,
                duration,
                &partition.structure_string(),
                alone_profits,
                coalition_profits,
            )?;
        }
        Ok(())
    }
}

impl EventHandler for CoalitionManager {
    fn on(&mut self, event: Event) {
        if self.failure.is_some() {
            // A fatal error already ended this replication; let the queue
            // drain without scheduling anything new.
            return;
        }
        cast!(match event.data {
            ArrivalBurstStart {
                service,
                duration,
                arrival_rate,
            } => {
                self.on_arrival_burst_start(service, duration, arrival_rate);
            }
            ArrivalBurstStop { service } => {
                self.on_arrival_burst_stop(service);
            }
            CoalitionFormationTrigger {
                start_time,
                stop_time,
            } => {
                self.on_coalition_formation_trigger(start_time, stop_time);
            }
        })
    }
}

/// One replication of the experiment.
pub struct FogSimulation {
    sim: Simulation,
    manager: Rc<RefCell<CoalitionManager>>,
}

impl FogSimulation {
    pub fn new(
        seed: u64,
        scenario: Rc<Scenario>,
        options: Rc<Options>,
        tables: Rc<IdentityTables>,
        stats_writer: Option<Rc<RefCell<StatsWriter>>>,
        trace_writer: Option<Rc<RefCell<TraceWriter>>>,
    ) -> Result<Self> {
        let mut sim = Simulation::new(seed);
        let ctx = sim.create_context("coalition_manager");
        let manager = rc!(refcell!(CoalitionManager::new(
            scenario,
            options,
            tables,
            stats_writer,
            trace_writer,
            ctx,
        )?));
        sim.add_handler("coalition_manager", manager.clone());
        manager.borrow_mut().schedule_initial_events();
        Ok(Self { sim, manager })
    }

    /// Runs the replication until the simulated duration elapses or the
    /// event queue drains, whichever comes first. A fatal error recorded by
    /// a handler is re-raised here.
    pub fn run(&mut self, max_duration: f64) -> Result<()> {
        self.sim.step_for_duration(max_duration);
        match self.manager.borrow_mut().take_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn coalition_profit_estimates(&self) -> Vec<f64> {
        self.manager.borrow().coalition_profit_estimates()
    }

    pub fn alone_profit_estimates(&self) -> Vec<f64> {
        self.manager.borrow().alone_profit_estimates()
    }
}
