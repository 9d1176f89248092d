//! Coalition formation: per-coalition solve records and the selection of
//! Nash-stable partitions of the provider set.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::combinatorics::LexicographicPartition;
use crate::error::Result;
use crate::float;
use crate::game::{CoalitionId, CooperativeGame, PlayerId};
use crate::vm_allocation::VmAllocation;

/// Default tolerance for payoff preference comparisons.
pub const STABILITY_TOLERANCE: f64 = 1e-9;

/// Everything recorded about one enumerated coalition: its placement solve,
/// its characteristic value and the division of that value.
///
/// An unsolved coalition keeps the `-inf` value and an empty payoff map; it
/// is never preferred by any player and never part of a stable partition.
#[derive(Debug, Clone)]
pub struct CoalitionInfo {
    pub vm_allocation: VmAllocation,
    pub value: f64,
    pub core_empty: bool,
    pub payoffs: BTreeMap<PlayerId, f64>,
    pub payoffs_in_core: bool,
}

impl Default for CoalitionInfo {
    fn default() -> Self {
        Self {
            vm_allocation: VmAllocation::default(),
            value: f64::NAN,
            core_empty: true,
            payoffs: BTreeMap::new(),
            payoffs_in_core: false,
        }
    }
}

impl CoalitionInfo {
    pub fn is_solved(&self) -> bool {
        self.vm_allocation.solved
    }
}

/// A candidate coalition structure with its total value and player payoffs.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub value: f64,
    pub coalitions: BTreeSet<CoalitionId>,
    pub payoffs: BTreeMap<PlayerId, f64>,
}

impl Default for PartitionInfo {
    fn default() -> Self {
        Self {
            value: f64::NEG_INFINITY,
            coalitions: BTreeSet::new(),
            payoffs: BTreeMap::new(),
        }
    }
}

impl PartitionInfo {
    /// Compact bracketed rendering of the structure, e.g. `{{0,1},{2}}`.
    pub fn structure_string(&self) -> String {
        let mut out = String::from("{");
        for (k, cid) in self.coalitions.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            out.push_str(&cid.to_string());
        }
        out.push('}');
        out
    }
}

/// Result of one activation of the coalition formation engine.
#[derive(Debug, Default)]
pub struct CoalitionFormationInfo {
    pub coalitions: BTreeMap<CoalitionId, CoalitionInfo>,
    pub best_partitions: Vec<PartitionInfo>,
}

/// Selects the partitions of the player set from which no player gains by
/// unilaterally moving to another block or to its own singleton.
pub struct NashStablePartitionSelector {
    tolerance: f64,
}

impl Default for NashStablePartitionSelector {
    fn default() -> Self {
        Self {
            tolerance: STABILITY_TOLERANCE,
        }
    }
}

impl NashStablePartitionSelector {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Enumerates every partition of the game's players in lexicographic
    /// order and returns the Nash-stable ones, in first-seen order.
    pub fn select(
        &self,
        game: &CooperativeGame,
        visited: &BTreeMap<CoalitionId, CoalitionInfo>,
    ) -> Result<Vec<PartitionInfo>> {
        let players = game.players().to_vec();
        let mut best_partitions = Vec::new();

        let mut partition = LexicographicPartition::new(players.len())?;
        loop {
            let blocks = partition.apply(&players)?;
            if let Some(candidate) = self.build_candidate(&blocks, visited) {
                if self.is_nash_stable(&candidate, visited) {
                    debug!(
                        "Nash-stable partition {} with value {}",
                        candidate.structure_string(),
                        candidate.value
                    );
                    best_partitions.push(candidate);
                }
            }

            if !partition.has_next() {
                break;
            }
            partition.advance()?;
        }

        Ok(best_partitions)
    }

    /// Assembles the candidate record, or `None` when the partition contains
    /// a coalition whose placement problem was not solved.
    fn build_candidate(
        &self,
        blocks: &[Vec<PlayerId>],
        visited: &BTreeMap<CoalitionId, CoalitionInfo>,
    ) -> Option<PartitionInfo> {
        let mut candidate = PartitionInfo {
            value: 0.0,
            ..PartitionInfo::default()
        };
        for block in blocks {
            let cid = CoalitionId::from_players(block.iter().copied());
            let info = visited.get(&cid)?;
            if !info.is_solved() {
                return None;
            }
            candidate.value += info.value;
            candidate.coalitions.insert(cid);
            for &pid in block {
                let payoff = info.payoffs.get(&pid).copied().unwrap_or(f64::NAN);
                candidate.payoffs.insert(pid, payoff);
            }
        }
        Some(candidate)
    }

    fn is_nash_stable(
        &self,
        candidate: &PartitionInfo,
        visited: &BTreeMap<CoalitionId, CoalitionInfo>,
    ) -> bool {
        for &own_cid in &candidate.coalitions {
            for pid in own_cid.players() {
                let own_payoff = candidate.payoffs[&pid];

                // Moving into another block of the partition.
                for &other_cid in &candidate.coalitions {
                    if other_cid == own_cid {
                        continue;
                    }
                    if self.prefers(pid, other_cid.insert(pid), own_payoff, visited) {
                        return false;
                    }
                }

                // Moving out into the singleton coalition.
                let singleton = CoalitionId::singleton(pid);
                if own_cid != singleton && self.prefers(pid, singleton, own_payoff, visited) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether player `pid` strictly prefers its payoff in `target` over
    /// `current_payoff`. Unsolved targets are never preferred.
    fn prefers(
        &self,
        pid: PlayerId,
        target: CoalitionId,
        current_payoff: f64,
        visited: &BTreeMap<CoalitionId, CoalitionInfo>,
    ) -> bool {
        match visited.get(&target).and_then(|info| info.payoffs.get(&pid)) {
            Some(&payoff) => float::definitely_greater(payoff, current_payoff, self.tolerance),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solved_info(value: f64, payoffs: &[(PlayerId, f64)]) -> CoalitionInfo {
        let mut info = CoalitionInfo {
            value,
            ..CoalitionInfo::default()
        };
        info.vm_allocation.solved = true;
        info.vm_allocation.objective_value = 0.0;
        for &(pid, payoff) in payoffs {
            info.payoffs.insert(pid, payoff);
        }
        info
    }

    fn two_player_setup(
        v0: f64,
        v1: f64,
        v01: Option<(f64, f64, f64)>,
    ) -> (CooperativeGame, BTreeMap<CoalitionId, CoalitionInfo>) {
        let mut game = CooperativeGame::new(2);
        let mut visited = BTreeMap::new();
        game.set_value(CoalitionId::singleton(0), v0);
        game.set_value(CoalitionId::singleton(1), v1);
        visited.insert(CoalitionId::singleton(0), solved_info(v0, &[(0, v0)]));
        visited.insert(CoalitionId::singleton(1), solved_info(v1, &[(1, v1)]));
        let pair = CoalitionId::from_players([0, 1]);
        match v01 {
            Some((v, p0, p1)) => {
                game.set_value(pair, v);
                visited.insert(pair, solved_info(v, &[(0, p0), (1, p1)]));
            }
            None => {
                game.set_value(pair, f64::NEG_INFINITY);
                visited.insert(pair, CoalitionInfo::default());
            }
        }
        (game, visited)
    }

    #[test]
    fn test_grand_coalition_dominates() {
        let (game, visited) = two_player_setup(1.0, 1.0, Some((4.0, 2.0, 2.0)));
        let stable = NashStablePartitionSelector::default()
            .select(&game, &visited)
            .unwrap();
        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].structure_string(), "{{0,1}}");
        assert!((stable[0].value - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_singletons_when_pairing_is_costly() {
        let (game, visited) = two_player_setup(1.0, 1.0, Some((-2.0, -1.0, -1.0)));
        let stable = NashStablePartitionSelector::default()
            .select(&game, &visited)
            .unwrap();
        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].structure_string(), "{{0},{1}}");
    }

    #[test]
    fn test_unsolved_grand_coalition_is_never_chosen_nor_preferred() {
        let (game, visited) = two_player_setup(1.0, 1.0, None);
        let stable = NashStablePartitionSelector::default()
            .select(&game, &visited)
            .unwrap();
        assert_eq!(stable.len(), 1);
        assert_eq!(stable[0].structure_string(), "{{0},{1}}");
    }

    #[test]
    fn test_indifferent_players_yield_multiple_stable_partitions() {
        // Equal payoffs everywhere: nobody strictly gains by moving.
        let (game, visited) = two_player_setup(1.0, 1.0, Some((2.0, 1.0, 1.0)));
        let stable = NashStablePartitionSelector::default()
            .select(&game, &visited)
            .unwrap();
        // Lexicographic partition order: the one-block partition comes first.
        assert_eq!(stable.len(), 2);
        assert_eq!(stable[0].structure_string(), "{{0,1}}");
        assert_eq!(stable[1].structure_string(), "{{0},{1}}");
    }

    #[test]
    fn test_returned_partitions_respect_deviation_monotonicity() {
        let (game, visited) = two_player_setup(1.0, 3.0, Some((5.0, 1.5, 3.5)));
        let stable = NashStablePartitionSelector::default()
            .select(&game, &visited)
            .unwrap();
        for partition in &stable {
            for &cid in &partition.coalitions {
                for pid in cid.players() {
                    let own = partition.payoffs[&pid];
                    for &other in &partition.coalitions {
                        if other == cid {
                            continue;
                        }
                        let aug = other.insert(pid);
                        if let Some(p) = visited[&aug].payoffs.get(&pid) {
                            assert!(!float::definitely_greater(*p, own, STABILITY_TOLERANCE));
                        }
                    }
                    if let Some(p) = visited[&CoalitionId::singleton(pid)].payoffs.get(&pid) {
                        if cid != CoalitionId::singleton(pid) {
                            assert!(!float::definitely_greater(*p, own, STABILITY_TOLERANCE));
                        }
                    }
                }
            }
        }
    }
}
