//! Solvers for the VM allocation problem.
//!
//! Given the fog nodes pooled by a coalition and the VM replicas its services
//! need, a solver decides which FNs are powered on and where each replica
//! lands so as to minimize electricity, power-transition and SLA-violation
//! costs. Any backend honoring [`VmAllocationSolver`] can be plugged in; the
//! default is an exact branch-and-bound search.

use std::time::Instant;

use log::warn;

use crate::vm_allocation::VmAllocation;

/// Inputs of one placement solve. FN and VM entries are global identities;
/// all per-identity tables are indexed by those identities, while the
/// solution is indexed by position within `fns` / `vms`.
pub struct VmAllocationProblem<'a> {
    /// Identities of the candidate FNs.
    pub fns: &'a [usize],
    /// Identities of the VM replicas to place.
    pub vms: &'a [usize],
    /// FP owning each FN.
    pub fn_to_fps: &'a [usize],
    /// Category of each FN.
    pub fn_categories: &'a [usize],
    /// Current power state of each FN.
    pub fn_power_states: &'a [bool],
    /// Zero-load power draw by FN category.
    pub fn_min_powers: &'a [f64],
    /// Full-load power draw by FN category.
    pub fn_max_powers: &'a [f64],
    /// Service owning each VM.
    pub vm_to_svcs: &'a [usize],
    /// VM category by service category.
    pub svc_vm_categories: &'a [usize],
    /// CPU requirement by VM category and FN category.
    pub vm_cpu_requirements: &'a [Vec<f64>],
    /// RAM requirement by VM category and FN category.
    pub vm_ram_requirements: &'a [Vec<f64>],
    /// FP owning each service.
    pub svc_to_fps: &'a [usize],
    /// Category of each service.
    pub svc_categories: &'a [usize],
    /// SLA delay bound by service category.
    pub svc_max_delays: &'a [f64],
    /// Predicted mean delay by service and replica count (`[0]` infinite).
    pub svc_predicted_delays: &'a [Vec<f64>],
    /// SLA penalty rate by FP and service category.
    pub fp_svc_penalties: &'a [Vec<f64>],
    /// Electricity price by FP.
    pub fp_electricity_costs: &'a [f64],
    /// Power-off transition cost by FP and FN category.
    pub fp_fn_asleep_costs: &'a [Vec<f64>],
    /// Power-on transition cost by FP and FN category.
    pub fp_fn_awake_costs: &'a [Vec<f64>],
}

pub trait VmAllocationSolver {
    fn solve(&self, problem: &VmAllocationProblem) -> VmAllocation;
}

/// Exact solver: depth-first branch-and-bound over VM-to-FN assignments.
///
/// Replicas of the same service are interchangeable, so the search only
/// visits assignments whose FN choice is non-decreasing within a service
/// (with "unplaced" ordered last). Power states are not branched on: an FN
/// hosting replicas must be on, and an idle FN takes whichever of
/// staying-on / powering-off / staying-off is cheapest.
///
/// `relative_tolerance` and `time_limit` mirror the usual solver knobs: they
/// may stop the proof of optimality early but never relax the constraints.
pub struct OptimalVmAllocationSolver {
    relative_tolerance: f64,
    time_limit: f64,
}

impl OptimalVmAllocationSolver {
    pub fn new(relative_tolerance: f64, time_limit: f64) -> Self {
        Self {
            relative_tolerance,
            time_limit,
        }
    }
}

impl VmAllocationSolver for OptimalVmAllocationSolver {
    fn solve(&self, problem: &VmAllocationProblem) -> VmAllocation {
        let mut search = Search::new(problem, self.relative_tolerance, self.time_limit);
        search.run();
        search.into_solution(problem)
    }
}

const CAPACITY_EPS: f64 = 1e-9;

/// Per-candidate-FN cost profile.
struct FnData {
    /// Cost of running the FN with at least one replica, before load.
    on_base: f64,
    /// Electricity per unit of allocated CPU.
    marginal_factor: f64,
    /// Cost of the cheapest idle choice.
    idle_cost: f64,
    /// Power state of the cheapest idle choice.
    idle_on: bool,
    /// Smallest cost this FN can contribute in any completion.
    min_commit: f64,
}

struct VmData {
    /// Position of this VM in the problem input.
    orig_pos: usize,
    /// Index into the solver's service table.
    svc_idx: usize,
    /// CPU requirement per candidate FN.
    cpu: Vec<f64>,
    /// RAM requirement per candidate FN.
    ram: Vec<f64>,
}

struct ServiceData {
    penalty_rate: f64,
    max_delay: f64,
    delays: Vec<f64>,
}

impl ServiceData {
    /// SLA penalty when `k` replicas of the service are running.
    fn penalty(&self, k: usize) -> f64 {
        if self.penalty_rate == 0.0 {
            return 0.0;
        }
        let idx = k.min(self.delays.len() - 1);
        let factor = (self.delays[idx] / self.max_delay).max(1.0) - 1.0;
        factor * self.penalty_rate
    }
}

struct Search {
    fns: Vec<FnData>,
    vms: Vec<VmData>,
    svcs: Vec<ServiceData>,
    /// `remaining[depth][s]`: replicas of service `s` not yet decided at
    /// search depth `depth`.
    remaining: Vec<Vec<usize>>,

    relative_tolerance: f64,
    deadline: Option<Instant>,

    fn_cpu: Vec<f64>,
    fn_ram: Vec<f64>,
    fn_cnt: Vec<usize>,
    svc_placed: Vec<usize>,
    assign: Vec<Option<usize>>,
    committed: f64,
    marginal: f64,
    idle_floor: f64,

    best_cost: f64,
    best_assign: Option<Vec<Option<usize>>>,
    root_bound: f64,
    timed_out: bool,
    gap_reached: bool,
}

impl Search {
    fn new(p: &VmAllocationProblem, relative_tolerance: f64, time_limit: f64) -> Self {
        let nfns = p.fns.len();

        let mut fns = Vec::with_capacity(nfns);
        for &fn_id in p.fns {
            let fp = p.fn_to_fps[fn_id];
            let cat = p.fn_categories[fn_id];
            let prev_on = p.fn_power_states[fn_id];
            let elec = p.fp_electricity_costs[fp];
            let keep_on = p.fn_min_powers[cat] * elec;
            let on_base = keep_on + if prev_on { 0.0 } else { p.fp_fn_awake_costs[fp][cat] };
            let (idle_cost, idle_on) = if prev_on {
                let asleep = p.fp_fn_asleep_costs[fp][cat];
                if asleep <= keep_on {
                    (asleep, false)
                } else {
                    (keep_on, true)
                }
            } else {
                (0.0, false)
            };
            fns.push(FnData {
                on_base,
                marginal_factor: (p.fn_max_powers[cat] - p.fn_min_powers[cat]) * elec,
                idle_cost,
                idle_on,
                min_commit: idle_cost.min(on_base),
            });
        }

        // Distinct services of the candidate VMs, in identity order.
        let mut svc_ids: Vec<usize> = p.vms.iter().map(|&vm| p.vm_to_svcs[vm]).collect();
        svc_ids.sort_unstable();
        svc_ids.dedup();
        let svcs: Vec<ServiceData> = svc_ids
            .iter()
            .map(|&svc| {
                let fp = p.svc_to_fps[svc];
                let cat = p.svc_categories[svc];
                ServiceData {
                    penalty_rate: p.fp_svc_penalties[fp][cat],
                    max_delay: p.svc_max_delays[cat],
                    delays: p.svc_predicted_delays[svc].clone(),
                }
            })
            .collect();

        // Group interchangeable replicas: VMs sorted by service, input order
        // within a service.
        let mut order: Vec<usize> = (0..p.vms.len()).collect();
        order.sort_by_key(|&j| (p.vm_to_svcs[p.vms[j]], j));
        let vms: Vec<VmData> = order
            .iter()
            .map(|&j| {
                let vm = p.vms[j];
                let svc = p.vm_to_svcs[vm];
                let vm_cat = p.svc_vm_categories[p.svc_categories[svc]];
                VmData {
                    orig_pos: j,
                    svc_idx: svc_ids.binary_search(&svc).unwrap(),
                    cpu: p
                        .fns
                        .iter()
                        .map(|&f| p.vm_cpu_requirements[vm_cat][p.fn_categories[f]])
                        .collect(),
                    ram: p
                        .fns
                        .iter()
                        .map(|&f| p.vm_ram_requirements[vm_cat][p.fn_categories[f]])
                        .collect(),
                }
            })
            .collect();

        let mut remaining = vec![vec![0usize; svcs.len()]; vms.len() + 1];
        for depth in (0..vms.len()).rev() {
            remaining[depth] = remaining[depth + 1].clone();
            remaining[depth][vms[depth].svc_idx] += 1;
        }

        let idle_floor = fns.iter().map(|f| f.min_commit).sum();
        let deadline = if time_limit > 0.0 {
            Some(Instant::now() + std::time::Duration::from_secs_f64(time_limit))
        } else {
            None
        };

        Self {
            fn_cpu: vec![0.0; nfns],
            fn_ram: vec![0.0; nfns],
            fn_cnt: vec![0; nfns],
            svc_placed: vec![0; svcs.len()],
            assign: vec![None; vms.len()],
            committed: 0.0,
            marginal: 0.0,
            idle_floor,
            best_cost: f64::INFINITY,
            best_assign: None,
            root_bound: f64::NEG_INFINITY,
            timed_out: false,
            gap_reached: false,
            fns,
            vms,
            svcs,
            remaining,
            relative_tolerance,
            deadline,
        }
    }

    fn run(&mut self) {
        self.root_bound = self.lower_bound(0);
        self.dfs(0);
    }

    fn lower_bound(&self, depth: usize) -> f64 {
        let mut bound = self.committed + self.marginal + self.idle_floor;
        for (s, svc) in self.svcs.iter().enumerate() {
            // Optimistic: every undecided replica of the service is placed.
            bound += svc.penalty(self.svc_placed[s] + self.remaining[depth][s]);
        }
        bound
    }

    fn dfs(&mut self, depth: usize) {
        if self.timed_out || self.gap_reached {
            return;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.timed_out = true;
                return;
            }
        }

        if depth == self.vms.len() {
            let cost = self.leaf_cost();
            if cost < self.best_cost {
                self.best_cost = cost;
                self.best_assign = Some(self.assign.clone());
                if self.relative_tolerance > 0.0
                    && cost.is_finite()
                    && cost - self.root_bound <= self.relative_tolerance * cost.abs()
                {
                    self.gap_reached = true;
                }
            }
            return;
        }

        if self.lower_bound(depth) >= self.best_cost {
            return;
        }

        let svc_idx = self.vms[depth].svc_idx;
        // Interchangeable replicas: restrict to non-decreasing FN choices
        // within a service, with "unplaced" last.
        let (first_fn, placeable) = if depth > 0 && self.vms[depth - 1].svc_idx == svc_idx {
            match self.assign[depth - 1] {
                Some(i) => (i, true),
                None => (0, false),
            }
        } else {
            (0, true)
        };

        if placeable {
            for i in first_fn..self.fns.len() {
                let cpu = self.vms[depth].cpu[i];
                let ram = self.vms[depth].ram[i];
                if self.fn_cpu[i] + cpu > 1.0 + CAPACITY_EPS
                    || self.fn_ram[i] + ram > 1.0 + CAPACITY_EPS
                {
                    continue;
                }
                self.place(depth, i);
                self.dfs(depth + 1);
                self.unplace(depth, i);
                if self.timed_out || self.gap_reached {
                    return;
                }
            }
        }

        // Leave the replica unplaced; the SLA penalty accounts for it.
        self.assign[depth] = None;
        self.dfs(depth + 1);
    }

    fn place(&mut self, depth: usize, i: usize) {
        let vm = &self.vms[depth];
        self.fn_cpu[i] += vm.cpu[i];
        self.fn_ram[i] += vm.ram[i];
        self.marginal += self.fns[i].marginal_factor * vm.cpu[i];
        if self.fn_cnt[i] == 0 {
            self.committed += self.fns[i].on_base;
            self.idle_floor -= self.fns[i].min_commit;
        }
        self.fn_cnt[i] += 1;
        self.svc_placed[vm.svc_idx] += 1;
        self.assign[depth] = Some(i);
    }

    fn unplace(&mut self, depth: usize, i: usize) {
        let vm = &self.vms[depth];
        self.fn_cpu[i] -= vm.cpu[i];
        self.fn_ram[i] -= vm.ram[i];
        self.marginal -= self.fns[i].marginal_factor * vm.cpu[i];
        self.fn_cnt[i] -= 1;
        if self.fn_cnt[i] == 0 {
            self.committed -= self.fns[i].on_base;
            self.idle_floor += self.fns[i].min_commit;
        }
        self.svc_placed[vm.svc_idx] -= 1;
        self.assign[depth] = None;
    }

    /// Exact objective of the current complete assignment, recomputed from
    /// scratch to keep incumbents free of incremental rounding drift.
    fn leaf_cost(&self) -> f64 {
        let mut cost = 0.0;
        for (i, fn_data) in self.fns.iter().enumerate() {
            if self.fn_cnt[i] > 0 {
                cost += fn_data.on_base + fn_data.marginal_factor * self.fn_cpu[i];
            } else {
                cost += fn_data.idle_cost;
            }
        }
        for (s, svc) in self.svcs.iter().enumerate() {
            cost += svc.penalty(self.svc_placed[s]);
        }
        cost
    }

    fn into_solution(self, problem: &VmAllocationProblem) -> VmAllocation {
        let mut solution = VmAllocation::default();

        let best_assign = match self.best_assign {
            Some(assign) if self.best_cost.is_finite() => assign,
            _ => {
                if self.timed_out {
                    warn!("placement solve stopped by the time limit without a usable solution");
                }
                return solution;
            }
        };

        if self.timed_out {
            warn!("placement solve hit the time limit; reporting the best found solution");
        } else if self.gap_reached {
            warn!("placement solve stopped within the relative tolerance; solution may be non-optimal");
        }

        solution.solved = true;
        solution.optimal = !self.timed_out && !self.gap_reached;
        solution.objective_value = self.best_cost;

        let nfns = problem.fns.len();
        let nvms = problem.vms.len();
        solution.fn_vm_allocations = vec![vec![false; nvms]; nfns];
        let mut hosted = vec![0usize; nfns];
        for (sorted_j, choice) in best_assign.iter().enumerate() {
            if let Some(i) = choice {
                solution.fn_vm_allocations[*i][self.vms[sorted_j].orig_pos] = true;
                hosted[*i] += 1;
            }
        }
        solution.fn_power_states = (0..nfns)
            .map(|i| hosted[i] > 0 || self.fns[i].idle_on)
            .collect();
        solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One provider, one FN category, one VM category; requirements 0.5/0.5.
    struct Fixture {
        fn_to_fps: Vec<usize>,
        fn_categories: Vec<usize>,
        fn_power_states: Vec<bool>,
        fn_min_powers: Vec<f64>,
        fn_max_powers: Vec<f64>,
        vm_to_svcs: Vec<usize>,
        svc_vm_categories: Vec<usize>,
        vm_cpu_requirements: Vec<Vec<f64>>,
        vm_ram_requirements: Vec<Vec<f64>>,
        svc_to_fps: Vec<usize>,
        svc_categories: Vec<usize>,
        svc_max_delays: Vec<f64>,
        svc_predicted_delays: Vec<Vec<f64>>,
        fp_svc_penalties: Vec<Vec<f64>>,
        fp_electricity_costs: Vec<f64>,
        fp_fn_asleep_costs: Vec<Vec<f64>>,
        fp_fn_awake_costs: Vec<Vec<f64>>,
    }

    impl Fixture {
        fn new(num_fns: usize, num_vms: usize) -> Self {
            Self {
                fn_to_fps: vec![0; num_fns],
                fn_categories: vec![0; num_fns],
                fn_power_states: vec![true; num_fns],
                fn_min_powers: vec![0.1],
                fn_max_powers: vec![0.2],
                vm_to_svcs: vec![0; num_vms],
                svc_vm_categories: vec![0],
                vm_cpu_requirements: vec![vec![0.5]],
                vm_ram_requirements: vec![vec![0.5]],
                svc_to_fps: vec![0],
                svc_categories: vec![0],
                svc_max_delays: vec![1.0],
                svc_predicted_delays: vec![vec![f64::INFINITY, 0.2]],
                fp_svc_penalties: vec![vec![100.0]],
                fp_electricity_costs: vec![0.1],
                fp_fn_asleep_costs: vec![vec![0.05]],
                fp_fn_awake_costs: vec![vec![0.05]],
            }
        }

        fn problem<'a>(&'a self, fns: &'a [usize], vms: &'a [usize]) -> VmAllocationProblem<'a> {
            VmAllocationProblem {
                fns,
                vms,
                fn_to_fps: &self.fn_to_fps,
                fn_categories: &self.fn_categories,
                fn_power_states: &self.fn_power_states,
                fn_min_powers: &self.fn_min_powers,
                fn_max_powers: &self.fn_max_powers,
                vm_to_svcs: &self.vm_to_svcs,
                svc_vm_categories: &self.svc_vm_categories,
                vm_cpu_requirements: &self.vm_cpu_requirements,
                vm_ram_requirements: &self.vm_ram_requirements,
                svc_to_fps: &self.svc_to_fps,
                svc_categories: &self.svc_categories,
                svc_max_delays: &self.svc_max_delays,
                svc_predicted_delays: &self.svc_predicted_delays,
                fp_svc_penalties: &self.fp_svc_penalties,
                fp_electricity_costs: &self.fp_electricity_costs,
                fp_fn_asleep_costs: &self.fp_fn_asleep_costs,
                fp_fn_awake_costs: &self.fp_fn_awake_costs,
            }
        }
    }

    fn check_constraints(p: &VmAllocationProblem, a: &VmAllocation) {
        for (i, row) in a.fn_vm_allocations.iter().enumerate() {
            let mut cpu = 0.0;
            let mut ram = 0.0;
            for (j, &placed) in row.iter().enumerate() {
                if placed {
                    assert!(a.fn_power_states[i], "VM on a powered-off FN");
                    let svc = p.vm_to_svcs[p.vms[j]];
                    let vm_cat = p.svc_vm_categories[p.svc_categories[svc]];
                    let fn_cat = p.fn_categories[p.fns[i]];
                    cpu += p.vm_cpu_requirements[vm_cat][fn_cat];
                    ram += p.vm_ram_requirements[vm_cat][fn_cat];
                }
            }
            assert!(cpu <= 1.0 + 1e-9, "CPU overcommitted on FN {}", i);
            assert!(ram <= 1.0 + 1e-9, "RAM overcommitted on FN {}", i);
        }
        for j in 0..p.vms.len() {
            assert!(a.num_placements(j) <= 1, "VM {} placed more than once", j);
        }
    }

    #[test]
    fn test_single_vm_single_fn() {
        let fixture = Fixture::new(1, 1);
        let problem = fixture.problem(&[0], &[0]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(solution.solved);
        assert!(solution.optimal);
        // Electricity: (0.1 + 0.1 * 0.5) * 0.1 = 0.015, no transitions, no
        // penalty (0.2 <= 1.0).
        assert!((solution.objective_value - 0.015).abs() < 1e-12);
        assert!(solution.fn_power_states[0]);
        assert!(solution.fn_vm_allocations[0][0]);
        check_constraints(&problem, &solution);
    }

    #[test]
    fn test_no_vms_prefers_cheapest_idle_choice() {
        let mut fixture = Fixture::new(2, 0);
        // FN 0: powering off (0.05) is costlier than staying on (0.01).
        // FN 1: already off, stays off for free.
        fixture.fn_power_states = vec![true, false];
        let problem = fixture.problem(&[0, 1], &[]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(solution.solved);
        assert!(solution.optimal);
        assert!((solution.objective_value - 0.01).abs() < 1e-12);
        assert!(solution.fn_power_states[0]);
        assert!(!solution.fn_power_states[1]);
    }

    #[test]
    fn test_switch_off_when_cheaper_than_idling() {
        let mut fixture = Fixture::new(1, 0);
        fixture.fp_fn_asleep_costs = vec![vec![0.001]];
        let problem = fixture.problem(&[0], &[]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(solution.solved);
        assert!((solution.objective_value - 0.001).abs() < 1e-12);
        assert!(!solution.fn_power_states[0]);
    }

    #[test]
    fn test_capacity_shortage_is_infeasible() {
        // Two replicas required, one host: at most one fits, the service
        // stays below its sizing target and the penalty is unbounded.
        let mut fixture = Fixture::new(1, 2);
        fixture.vm_cpu_requirements = vec![vec![0.6]];
        fixture.svc_predicted_delays = vec![vec![f64::INFINITY, f64::INFINITY, 0.1]];
        let problem = fixture.problem(&[0], &[0, 1]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(!solution.solved);
        assert!(solution.objective_value.is_nan());
    }

    #[test]
    fn test_extra_replica_beats_penalty() {
        // One replica leaves a 0.5s delay against a 0.2s bound: paying the
        // second host is cheaper than the SLA penalty.
        let mut fixture = Fixture::new(2, 2);
        fixture.svc_predicted_delays = vec![vec![f64::INFINITY, 0.5, 0.1]];
        fixture.svc_max_delays = vec![0.2];
        fixture.fp_svc_penalties = vec![vec![1.0]];
        let problem = fixture.problem(&[0, 1], &[0, 1]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(solution.solved);
        assert_eq!(solution.num_placements(0) + solution.num_placements(1), 2);
        check_constraints(&problem, &solution);
        // Both replicas fit on one host (0.5 CPU each): one powered FN at
        // full load, the other stays on idle or powers off, whichever wins.
        assert!((solution.objective_value - (0.02 + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_penalty_rate_places_nothing_for_free_service() {
        // With a zero penalty rate the service never forces hosts on.
        let mut fixture = Fixture::new(1, 1);
        fixture.fp_svc_penalties = vec![vec![0.0]];
        fixture.fp_fn_asleep_costs = vec![vec![0.0]];
        let problem = fixture.problem(&[0], &[0]);
        let solution = OptimalVmAllocationSolver::new(0.0, -1.0).solve(&problem);
        assert!(solution.solved);
        assert_eq!(solution.num_placements(0), 0);
        assert!((solution.objective_value - 0.0).abs() < 1e-12);
        assert!(!solution.fn_power_states[0]);
    }
}
