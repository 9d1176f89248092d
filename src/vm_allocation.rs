//! Solution of the VM allocation problem.

use serde::Serialize;

/// Outcome of one placement solve over a coalition's pooled fog nodes.
///
/// `fn_vm_allocations` and `fn_power_states` are indexed by the *positions*
/// of the candidate FNs and VMs handed to the solver, not by their global
/// identities.
#[derive(Debug, Clone, Serialize)]
pub struct VmAllocation {
    /// The solver produced a usable assignment.
    pub solved: bool,
    /// The assignment was proven optimal (no time-limit or gap early stop).
    pub optimal: bool,
    /// Minimized cost; `NaN` when `solved` is false.
    pub objective_value: f64,
    /// `fn_vm_allocations[i][j]` is true iff VM `j` runs on FN `i`.
    pub fn_vm_allocations: Vec<Vec<bool>>,
    /// Power state decided for every candidate FN.
    pub fn_power_states: Vec<bool>,
}

impl Default for VmAllocation {
    fn default() -> Self {
        Self {
            solved: false,
            optimal: false,
            objective_value: f64::NAN,
            fn_vm_allocations: Vec::new(),
            fn_power_states: Vec::new(),
        }
    }
}

impl VmAllocation {
    /// Number of placed replicas of the given VM position.
    pub fn num_placements(&self, vm_idx: usize) -> usize {
        self.fn_vm_allocations
            .iter()
            .filter(|row| row[vm_idx])
            .count()
    }
}
