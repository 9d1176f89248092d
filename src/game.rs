//! Transferable-utility cooperative game primitives: canonical coalition
//! identifiers, enumerated characteristic functions, the Shapley value and
//! core membership.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use log::warn;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::float;

pub type PlayerId = usize;

/// Tolerance for payoff comparisons in core membership checks.
const CORE_TOLERANCE: f64 = 1e-9;

/// A coalition encoded as a bitmask over player identities, so that id
/// equality is exactly player-set equality and ids order lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CoalitionId(u64);

impl CoalitionId {
    pub const EMPTY: CoalitionId = CoalitionId(0);

    pub fn from_players<I: IntoIterator<Item = PlayerId>>(players: I) -> Self {
        let mut bits = 0u64;
        for p in players {
            bits |= 1 << p;
        }
        CoalitionId(bits)
    }

    pub fn singleton(player: PlayerId) -> Self {
        CoalitionId(1 << player)
    }

    pub fn contains(self, player: PlayerId) -> bool {
        self.0 & (1 << player) != 0
    }

    #[must_use]
    pub fn insert(self, player: PlayerId) -> Self {
        CoalitionId(self.0 | (1 << player))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_subset_of(self, other: CoalitionId) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn num_players(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn players(self) -> Vec<PlayerId> {
        (0..64).filter(|p| self.contains(*p)).collect()
    }
}

impl Display for CoalitionId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{{")?;
        for (k, p) in self.players().into_iter().enumerate() {
            if k > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "}}")
    }
}

/// A TU game with an enumerated characteristic function over an explicit
/// player set. Unset coalitions are worth `NaN` except the empty coalition,
/// which is worth zero.
#[derive(Debug, Clone)]
pub struct CooperativeGame {
    players: Vec<PlayerId>,
    values: BTreeMap<CoalitionId, f64>,
}

impl CooperativeGame {
    pub fn new(num_players: usize) -> Self {
        Self::with_players((0..num_players).collect())
    }

    pub fn with_players(mut players: Vec<PlayerId>) -> Self {
        players.sort_unstable();
        players.dedup();
        Self {
            players,
            values: BTreeMap::new(),
        }
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    pub fn grand_coalition(&self) -> CoalitionId {
        CoalitionId::from_players(self.players.iter().copied())
    }

    pub fn value(&self, cid: CoalitionId) -> f64 {
        if cid.is_empty() {
            return 0.0;
        }
        self.values.get(&cid).copied().unwrap_or(f64::NAN)
    }

    pub fn set_value(&mut self, cid: CoalitionId, value: f64) {
        self.values.insert(cid, value);
    }

    /// The game restricted to `players`, keeping the values of all their
    /// sub-coalitions.
    pub fn subgame(&self, players: &[PlayerId]) -> CooperativeGame {
        let mut sub = CooperativeGame::with_players(players.to_vec());
        let universe = sub.grand_coalition();
        for (&cid, &value) in &self.values {
            if cid.is_subset_of(universe) {
                sub.values.insert(cid, value);
            }
        }
        sub
    }
}

fn factorial(n: usize) -> Result<u128> {
    let mut acc: u128 = 1;
    for k in 2..=n as u128 {
        acc = acc
            .checked_mul(k)
            .ok_or_else(|| Error::Overflow(format!("factorial({}) exceeds u128", n)))?;
    }
    Ok(acc)
}

/// Shapley value of the game: for each player the marginal contribution
/// averaged over all join orders,
/// `phi_i = sum_{S <= N\{i}} |S|! (n-|S|-1)! / n! * (v(S+i) - v(S))`.
pub fn shapley_value(game: &CooperativeGame) -> Result<BTreeMap<PlayerId, f64>> {
    let players = game.players();
    let n = players.len();
    let n_factorial = factorial(n)? as f64;
    let mut weights = Vec::with_capacity(n);
    for s in 0..n {
        weights.push((factorial(s)? as f64) * (factorial(n - 1 - s)? as f64) / n_factorial);
    }

    let mut payoffs = BTreeMap::new();
    for (idx, &i) in players.iter().enumerate() {
        let others: Vec<PlayerId> = players
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != idx)
            .map(|(_, &p)| p)
            .collect();
        let mut phi = 0.0;
        for mask in 0u64..(1 << others.len()) {
            let coalition = CoalitionId::from_players(
                others
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| mask & (1 << k) != 0)
                    .map(|(_, &p)| p),
            );
            let augmented = coalition.insert(i);
            phi += weights[coalition.num_players()]
                * (game.value(augmented) - game.value(coalition));
        }
        payoffs.insert(i, phi);
    }
    Ok(payoffs)
}

/// The core of the game, together with enough of the characteristic function
/// to answer membership queries.
#[derive(Debug, Clone)]
pub struct Core {
    empty: bool,
    game: CooperativeGame,
}

impl Core {
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Whether a payoff vector is efficient and coalitionally rational.
    pub fn belongs_to_core(&self, payoffs: &BTreeMap<PlayerId, f64>) -> bool {
        let grand = self.game.grand_coalition();
        let total: f64 = self
            .game
            .players()
            .iter()
            .map(|p| payoffs.get(p).copied().unwrap_or(f64::NAN))
            .sum();
        if !float::approximately_equal(total, self.game.value(grand), CORE_TOLERANCE) {
            return false;
        }
        for cid in proper_sub_coalitions(&self.game) {
            let v = self.game.value(cid);
            if v == f64::NEG_INFINITY {
                continue;
            }
            let share: f64 = cid.players().iter().map(|p| payoffs[p]).sum();
            if float::definitely_less(share, v, CORE_TOLERANCE) {
                return false;
            }
        }
        true
    }
}

/// Computes the core of the game. Non-emptiness is decided by linear
/// feasibility of `{x : sum x_i = v(N), sum_{i in S} x_i >= v(S) for S < N}`.
pub fn find_core(game: &CooperativeGame) -> Core {
    let empty = !core_is_feasible(game);
    Core {
        empty,
        game: game.clone(),
    }
}

fn proper_sub_coalitions(game: &CooperativeGame) -> Vec<CoalitionId> {
    let players = game.players();
    let n = players.len();
    let mut out = Vec::new();
    for mask in 1u64..((1 << n) - 1) {
        out.push(CoalitionId::from_players(
            players
                .iter()
                .enumerate()
                .filter(|&(k, _)| mask & (1 << k) != 0)
                .map(|(_, &p)| p),
        ));
    }
    out
}

fn core_is_feasible(game: &CooperativeGame) -> bool {
    let players = game.players();
    let n = players.len();
    let grand_value = game.value(game.grand_coalition());
    if grand_value.is_nan() || grand_value == f64::NEG_INFINITY {
        return false;
    }
    if n == 1 {
        return true;
    }

    // Rows: the efficiency equality first, then one rationality constraint
    // per proper sub-coalition (constraints worth -inf are vacuous).
    let mut rows: Vec<(Vec<f64>, f64, bool)> = Vec::new();
    rows.push((vec![1.0; n], grand_value, true));
    for cid in proper_sub_coalitions(game) {
        let v = game.value(cid);
        if v == f64::NEG_INFINITY {
            continue;
        }
        if v.is_nan() {
            return false;
        }
        let coeffs = players
            .iter()
            .map(|&p| if cid.contains(p) { 1.0 } else { 0.0 })
            .collect();
        rows.push((coeffs, v, false));
    }
    lp_feasible(n, &rows)
}

/// Phase-one simplex feasibility test for a system of one-sided constraints
/// over free variables: each row is `(coeffs, rhs, is_equality)` meaning
/// `coeffs . x = rhs` or `coeffs . x >= rhs`.
///
/// Free variables are split into positive parts, `>=` rows get a surplus
/// variable, every row gets an artificial, and the artificial mass is
/// minimized with Bland's rule. Feasible iff that minimum is (numerically)
/// zero.
fn lp_feasible(num_vars: usize, rows: &[(Vec<f64>, f64, bool)]) -> bool {
    const EPS: f64 = 1e-9;
    let m = rows.len();
    // Columns: x+ (num_vars), x- (num_vars), surplus (one per inequality),
    // artificials (one per row), then the rhs.
    let num_surplus = rows.iter().filter(|r| !r.2).count();
    let cols = 2 * num_vars + num_surplus + m + 1;
    let mut tableau = vec![vec![0.0; cols]; m + 1];
    let rhs_col = cols - 1;

    let mut surplus_idx = 0;
    let mut basis = vec![0usize; m];
    for (r, (coeffs, rhs, is_eq)) in rows.iter().enumerate() {
        let sign = if *rhs < 0.0 { -1.0 } else { 1.0 };
        for (j, &c) in coeffs.iter().enumerate() {
            tableau[r][j] = sign * c;
            tableau[r][num_vars + j] = -sign * c;
        }
        if !is_eq {
            tableau[r][2 * num_vars + surplus_idx] = -sign;
            surplus_idx += 1;
        }
        let art_col = 2 * num_vars + num_surplus + r;
        tableau[r][art_col] = 1.0;
        tableau[r][rhs_col] = sign * rhs;
        basis[r] = art_col;
    }

    // Objective row: minimize the sum of artificials, expressed in terms of
    // the non-basic columns.
    for r in 0..m {
        for j in 0..cols {
            tableau[m][j] += tableau[r][j];
        }
    }
    for r in 0..m {
        let art_col = 2 * num_vars + num_surplus + r;
        tableau[m][art_col] = 0.0;
    }

    let max_iterations = 50_000;
    for _ in 0..max_iterations {
        // Bland's rule: smallest improving column.
        let mut pivot_col = None;
        for j in 0..rhs_col {
            if tableau[m][j] > EPS {
                pivot_col = Some(j);
                break;
            }
        }
        let Some(pc) = pivot_col else {
            return tableau[m][rhs_col] <= EPS;
        };

        // Ratio test, ties broken by smallest basis index.
        let mut pivot_row = None;
        let mut best_ratio = f64::INFINITY;
        for r in 0..m {
            if tableau[r][pc] > EPS {
                let ratio = tableau[r][rhs_col] / tableau[r][pc];
                if ratio < best_ratio - EPS
                    || (ratio < best_ratio + EPS
                        && pivot_row.map_or(true, |pr: usize| basis[r] < basis[pr]))
                {
                    best_ratio = ratio;
                    pivot_row = Some(r);
                }
            }
        }
        let Some(pr) = pivot_row else {
            // Unbounded phase-one objective cannot happen; treat defensively
            // as infeasible.
            return false;
        };

        let pivot = tableau[pr][pc];
        for j in 0..cols {
            tableau[pr][j] /= pivot;
        }
        for r in 0..=m {
            if r != pr {
                let factor = tableau[r][pc];
                if factor != 0.0 {
                    for j in 0..cols {
                        tableau[r][j] -= factor * tableau[pr][j];
                    }
                }
            }
        }
        basis[pr] = pc;
    }

    warn!("core feasibility test did not converge; reporting an empty core");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalition_id_is_canonical() {
        let a = CoalitionId::from_players([2, 0, 1]);
        let b = CoalitionId::from_players([0, 1, 2]);
        assert_eq!(a, b);
        assert_eq!(a.players(), vec![0, 1, 2]);
        assert_eq!(a.num_players(), 3);
        assert!(CoalitionId::singleton(1).is_subset_of(a));
        assert_eq!(format!("{}", a), "{0,1,2}");
    }

    #[test]
    fn test_shapley_two_player_symmetric() {
        let mut game = CooperativeGame::new(2);
        game.set_value(CoalitionId::singleton(0), 0.0);
        game.set_value(CoalitionId::singleton(1), 0.0);
        game.set_value(CoalitionId::from_players([0, 1]), 1.0);
        let phi = shapley_value(&game).unwrap();
        assert!((phi[&0] - 0.5).abs() < 1e-12);
        assert!((phi[&1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_shapley_sums_to_grand_value() {
        let mut game = CooperativeGame::new(3);
        game.set_value(CoalitionId::singleton(0), 1.0);
        game.set_value(CoalitionId::singleton(1), 2.0);
        game.set_value(CoalitionId::singleton(2), 3.0);
        game.set_value(CoalitionId::from_players([0, 1]), 4.0);
        game.set_value(CoalitionId::from_players([0, 2]), 5.0);
        game.set_value(CoalitionId::from_players([1, 2]), 6.0);
        game.set_value(CoalitionId::from_players([0, 1, 2]), 10.0);
        let phi = shapley_value(&game).unwrap();
        let total: f64 = phi.values().sum();
        assert!((total - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_shapley_on_subgame_players() {
        let mut game = CooperativeGame::with_players(vec![1, 3]);
        game.set_value(CoalitionId::singleton(1), 1.0);
        game.set_value(CoalitionId::singleton(3), 1.0);
        game.set_value(CoalitionId::from_players([1, 3]), 4.0);
        let phi = shapley_value(&game).unwrap();
        assert!((phi[&1] - 2.0).abs() < 1e-12);
        assert!((phi[&3] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_factorial_overflow_is_reported() {
        assert!(factorial(20).is_ok());
        assert!(factorial(35).is_err());
    }

    #[test]
    fn test_core_nonempty_for_superadditive_game() {
        let mut game = CooperativeGame::new(2);
        game.set_value(CoalitionId::singleton(0), 1.0);
        game.set_value(CoalitionId::singleton(1), 1.0);
        game.set_value(CoalitionId::from_players([0, 1]), 4.0);
        let core = find_core(&game);
        assert!(!core.is_empty());
        let mut payoffs = BTreeMap::new();
        payoffs.insert(0, 2.0);
        payoffs.insert(1, 2.0);
        assert!(core.belongs_to_core(&payoffs));
        payoffs.insert(0, 3.5);
        payoffs.insert(1, 0.5);
        assert!(!core.belongs_to_core(&payoffs));
    }

    #[test]
    fn test_core_empty_for_majority_game() {
        // Three-player majority game: every pair already claims the whole
        // unit, so no efficient vector satisfies all pairs.
        let mut game = CooperativeGame::new(3);
        for p in 0..3 {
            game.set_value(CoalitionId::singleton(p), 0.0);
        }
        game.set_value(CoalitionId::from_players([0, 1]), 1.0);
        game.set_value(CoalitionId::from_players([0, 2]), 1.0);
        game.set_value(CoalitionId::from_players([1, 2]), 1.0);
        game.set_value(CoalitionId::from_players([0, 1, 2]), 1.0);
        assert!(find_core(&game).is_empty());
    }

    #[test]
    fn test_core_with_infeasible_subcoalition() {
        // A -inf sub-coalition never constrains the core.
        let mut game = CooperativeGame::new(2);
        game.set_value(CoalitionId::singleton(0), f64::NEG_INFINITY);
        game.set_value(CoalitionId::singleton(1), 0.0);
        game.set_value(CoalitionId::from_players([0, 1]), 2.0);
        assert!(!find_core(&game).is_empty());
    }

    #[test]
    fn test_core_of_singleton_game() {
        let mut game = CooperativeGame::new(1);
        game.set_value(CoalitionId::singleton(0), 7.0);
        let core = find_core(&game);
        assert!(!core.is_empty());
        let mut payoffs = BTreeMap::new();
        payoffs.insert(0, 7.0);
        assert!(core.belongs_to_core(&payoffs));
    }
}
