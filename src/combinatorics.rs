//! Bidirectional lexicographic enumeration of subsets and set-partitions.
//!
//! The coalition logic visits every non-empty subset of the provider set and
//! every set-partition of it, always in the same order, so the enumeration
//! state is kept explicit (a bitmask for subsets, a restricted growth string
//! for partitions) and supports stepping both forward and backward.
//!
//! The iteration protocol is: inspect the current state, then `advance()`
//! while `has_next()` reports true. Stepping past either end is an error.

use crate::error::{Error, Result};

const MAX_SUBSET_ELEMENTS: usize = 63;

/// Generates all subsets of `{0..n-1}` in lexicographic (bitmask) order,
/// optionally including the empty set.
///
/// For `n = 3` with the empty set enabled the visited sequence is
/// `{}, {0}, {1}, {0,1}, {2}, {0,2}, {1,2}, {0,1,2}`.
#[derive(Debug, Clone)]
pub struct LexicographicSubset {
    n: usize,
    with_empty_set: bool,
    mask: u64,
}

impl LexicographicSubset {
    pub fn new(n: usize, with_empty_set: bool) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "number of elements must be positive".to_string(),
            ));
        }
        if n > MAX_SUBSET_ELEMENTS {
            return Err(Error::InvalidArgument(format!(
                "number of elements must not exceed {}",
                MAX_SUBSET_ELEMENTS
            )));
        }
        Ok(Self {
            n,
            with_empty_set,
            mask: if with_empty_set { 0 } else { 1 },
        })
    }

    pub fn num_elements(&self) -> usize {
        self.n
    }

    /// Number of elements in the current subset.
    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Total number of subsets the full enumeration visits.
    pub fn count(&self) -> u64 {
        let c = 1u64 << self.n;
        if self.with_empty_set {
            c
        } else {
            c - 1
        }
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn has_next(&self) -> bool {
        self.mask < (1u64 << self.n) - 1
    }

    pub fn has_prev(&self) -> bool {
        self.mask > if self.with_empty_set { 0 } else { 1 }
    }

    pub fn advance(&mut self) -> Result<()> {
        if !self.has_next() {
            return Err(Error::IteratorOverflow);
        }
        self.mask += 1;
        Ok(())
    }

    pub fn retreat(&mut self) -> Result<()> {
        if !self.has_prev() {
            return Err(Error::IteratorUnderflow);
        }
        self.mask -= 1;
        Ok(())
    }

    /// Indices of the elements in the current subset, in increasing order.
    pub fn elements(&self) -> Vec<usize> {
        (0..self.n).filter(|i| self.mask & (1 << i) != 0).collect()
    }

    /// Maps the current subset onto a concrete value sequence.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Result<Vec<T>> {
        if values.len() != self.n {
            return Err(Error::InvalidArgument(
                "value sequence size does not match the ground set".to_string(),
            ));
        }
        Ok(self.elements().into_iter().map(|i| values[i].clone()).collect())
    }
}

/// Generates all set-partitions of `{0..n-1}` in lexicographic order of their
/// restricted growth strings.
///
/// The state is the string `kappa` (`kappa[i]` is the block of element `i`)
/// together with the running maxima `m[i] = max(kappa[0..=i])`, which makes
/// both stepping directions and the block count O(1)-checkable.
#[derive(Debug, Clone)]
pub struct LexicographicPartition {
    n: usize,
    kappa: Vec<usize>,
    m: Vec<usize>,
}

impl LexicographicPartition {
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "number of elements must be positive".to_string(),
            ));
        }
        Ok(Self {
            n,
            kappa: vec![0; n],
            m: vec![0; n],
        })
    }

    pub fn num_elements(&self) -> usize {
        self.n
    }

    pub fn num_blocks(&self) -> usize {
        self.m[self.n - 1] + 1
    }

    pub fn kappa(&self) -> &[usize] {
        &self.kappa
    }

    pub fn has_next(&self) -> bool {
        self.num_blocks() < self.n
    }

    pub fn has_prev(&self) -> bool {
        self.num_blocks() > 1
    }

    pub fn advance(&mut self) -> Result<()> {
        if !self.has_next() {
            return Err(Error::IteratorOverflow);
        }
        for i in (1..self.n).rev() {
            if self.kappa[i] <= self.m[i - 1] {
                self.kappa[i] += 1;
                let new_max = self.m[i].max(self.kappa[i]);
                self.m[i] = new_max;
                for j in i + 1..self.n {
                    self.kappa[j] = 0;
                    self.m[j] = new_max;
                }
                break;
            }
        }
        self.integrity_check();
        Ok(())
    }

    pub fn retreat(&mut self) -> Result<()> {
        if !self.has_prev() {
            return Err(Error::IteratorUnderflow);
        }
        for i in (1..self.n).rev() {
            if self.kappa[i] > 0 {
                self.kappa[i] -= 1;
                let m_i = self.m[i - 1];
                self.m[i] = m_i.max(self.kappa[i]);
                for j in i + 1..self.n {
                    let new_max = m_i + j - i;
                    self.kappa[j] = new_max;
                    self.m[j] = new_max;
                }
                break;
            }
        }
        self.integrity_check();
        Ok(())
    }

    /// Maps the current partition onto a concrete value sequence, yielding one
    /// `Vec` per block.
    pub fn apply<T: Clone>(&self, values: &[T]) -> Result<Vec<Vec<T>>> {
        if values.len() != self.n {
            return Err(Error::InvalidArgument(
                "value sequence size does not match the ground set".to_string(),
            ));
        }
        let mut blocks = vec![Vec::new(); self.num_blocks()];
        for (i, value) in values.iter().enumerate() {
            blocks[self.kappa[i]].push(value.clone());
        }
        Ok(blocks)
    }

    fn integrity_check(&self) {
        if cfg!(debug_assertions) {
            let mut max = self.kappa[0];
            for i in 0..self.n {
                max = max.max(self.kappa[i]);
                assert_eq!(max, self.m[i], "restricted growth string maxima out of sync");
            }
            assert_eq!(self.kappa[0], 0, "restricted growth string must start at 0");
        }
    }
}

/// Generates, in lexicographic order, all set-partitions of `{0..n-1}` with
/// exactly `k` blocks.
#[derive(Debug, Clone)]
pub struct LexicographicKPartition {
    n: usize,
    k: usize,
    kappa: Vec<usize>,
    m: Vec<usize>,
    first: Vec<usize>,
    last: Vec<usize>,
}

impl LexicographicKPartition {
    pub fn new(n: usize, k: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "number of elements must be positive".to_string(),
            ));
        }
        if k == 0 || k > n {
            return Err(Error::InvalidArgument(
                "number of blocks is out of range".to_string(),
            ));
        }

        // First state: the k-1 last elements open the extra blocks.
        let offset = n - k;
        let mut first = vec![0; n];
        for (i, v) in first.iter_mut().enumerate().skip(offset + 1) {
            *v = i - offset;
        }

        // Last state: blocks open as early as possible, tail in the top block.
        let mut last = vec![0; n];
        for (i, v) in last.iter_mut().enumerate().take(k).skip(1) {
            *v = i;
        }
        for v in last.iter_mut().skip(k) {
            *v = k - 1;
        }

        let kappa = first.clone();
        let m = running_maxima(&kappa);
        Ok(Self {
            n,
            k,
            kappa,
            m,
            first,
            last,
        })
    }

    pub fn num_elements(&self) -> usize {
        self.n
    }

    pub fn num_blocks(&self) -> usize {
        self.k
    }

    pub fn kappa(&self) -> &[usize] {
        &self.kappa
    }

    pub fn has_next(&self) -> bool {
        self.kappa != self.last
    }

    pub fn has_prev(&self) -> bool {
        self.kappa != self.first
    }

    pub fn advance(&mut self) -> Result<()> {
        if !self.has_next() {
            return Err(Error::IteratorOverflow);
        }
        for i in (1..self.n).rev() {
            if self.kappa[i] < self.k - 1 && self.kappa[i] <= self.m[i - 1] {
                self.kappa[i] += 1;
                let new_max = self.m[i].max(self.kappa[i]);
                self.m[i] = new_max;
                // Minimal suffix that still reaches k blocks: zeros first,
                // then the forced tail that opens the missing blocks.
                let tail_start = self.n - (self.k - 1 - new_max);
                for j in i + 1..tail_start {
                    self.kappa[j] = 0;
                    self.m[j] = new_max;
                }
                for j in tail_start..self.n {
                    let v = self.k - (self.n - j);
                    self.kappa[j] = v;
                    self.m[j] = v;
                }
                break;
            }
        }
        self.integrity_check();
        Ok(())
    }

    pub fn retreat(&mut self) -> Result<()> {
        if !self.has_prev() {
            return Err(Error::IteratorUnderflow);
        }
        for i in (1..self.n).rev() {
            // Decrementable only if the suffix can still open k blocks.
            if self.kappa[i] > 0 && self.k - self.m[i - 1] <= self.n - i {
                self.kappa[i] -= 1;
                self.m[i] = self.m[i - 1].max(self.kappa[i]);
                // Maximal suffix: grow the block index as fast as allowed,
                // capped at the top block.
                for j in i + 1..self.n {
                    let v = (self.m[j - 1] + 1).min(self.k - 1);
                    self.kappa[j] = v;
                    self.m[j] = self.m[j - 1].max(v);
                }
                break;
            }
        }
        self.integrity_check();
        Ok(())
    }

    pub fn apply<T: Clone>(&self, values: &[T]) -> Result<Vec<Vec<T>>> {
        if values.len() != self.n {
            return Err(Error::InvalidArgument(
                "value sequence size does not match the ground set".to_string(),
            ));
        }
        let mut blocks = vec![Vec::new(); self.k];
        for (i, value) in values.iter().enumerate() {
            blocks[self.kappa[i]].push(value.clone());
        }
        Ok(blocks)
    }

    fn integrity_check(&self) {
        if cfg!(debug_assertions) {
            let mut max = self.kappa[0];
            for i in 0..self.n {
                max = max.max(self.kappa[i]);
                assert_eq!(max, self.m[i], "restricted growth string maxima out of sync");
            }
            assert_eq!(max + 1, self.k, "partition does not have exactly k blocks");
        }
    }
}

fn running_maxima(kappa: &[usize]) -> Vec<usize> {
    let mut m = vec![0; kappa.len()];
    let mut max = 0;
    for (i, &v) in kappa.iter().enumerate() {
        max = max.max(v);
        m[i] = max;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    const BELL: [u64; 9] = [1, 1, 2, 5, 15, 52, 203, 877, 4140];

    fn stirling2(n: usize, k: usize) -> u64 {
        if n == 0 && k == 0 {
            return 1;
        }
        if n == 0 || k == 0 {
            return 0;
        }
        k as u64 * stirling2(n - 1, k) + stirling2(n - 1, k - 1)
    }

    #[test]
    fn test_subset_counts() {
        for n in 1..=12 {
            for with_empty in [true, false] {
                let mut it = LexicographicSubset::new(n, with_empty).unwrap();
                let mut count = 1u64;
                while it.has_next() {
                    it.advance().unwrap();
                    count += 1;
                }
                let expected = if with_empty { 1u64 << n } else { (1u64 << n) - 1 };
                assert_eq!(count, expected, "n={} empty={}", n, with_empty);
                assert_eq!(it.count(), expected);
            }
        }
    }

    #[test]
    fn test_subset_order() {
        let mut it = LexicographicSubset::new(3, true).unwrap();
        let mut seen = vec![it.elements()];
        while it.has_next() {
            it.advance().unwrap();
            seen.push(it.elements());
        }
        assert_eq!(
            seen,
            vec![
                vec![],
                vec![0],
                vec![1],
                vec![0, 1],
                vec![2],
                vec![0, 2],
                vec![1, 2],
                vec![0, 1, 2],
            ]
        );
    }

    #[test]
    fn test_subset_apply_and_inversion() {
        let values = vec!["a", "b", "c", "d"];
        let mut it = LexicographicSubset::new(4, false).unwrap();
        assert_eq!(it.apply(&values).unwrap(), vec!["a"]);
        it.advance().unwrap();
        it.advance().unwrap();
        let snapshot = it.elements();
        it.advance().unwrap();
        it.retreat().unwrap();
        assert_eq!(it.elements(), snapshot);
        it.retreat().unwrap();
        it.advance().unwrap();
        assert_eq!(it.elements(), snapshot);
    }

    #[test]
    fn test_subset_bounds() {
        assert!(LexicographicSubset::new(0, true).is_err());
        let mut it = LexicographicSubset::new(1, true).unwrap();
        assert!(it.retreat().is_err());
        it.advance().unwrap();
        assert!(it.advance().is_err());
    }

    #[test]
    fn test_partition_counts_match_bell_numbers() {
        for n in 1..=8 {
            let mut it = LexicographicPartition::new(n).unwrap();
            let mut count = 1u64;
            while it.has_next() {
                it.advance().unwrap();
                count += 1;
            }
            assert_eq!(count, BELL[n], "n={}", n);
        }
    }

    #[test]
    fn test_partition_order() {
        let mut it = LexicographicPartition::new(3).unwrap();
        let mut seen = vec![it.kappa().to_vec()];
        while it.has_next() {
            it.advance().unwrap();
            seen.push(it.kappa().to_vec());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 0, 0],
                vec![0, 0, 1],
                vec![0, 1, 0],
                vec![0, 1, 1],
                vec![0, 1, 2],
            ]
        );
    }

    #[test]
    fn test_partition_inversion() {
        let mut it = LexicographicPartition::new(5).unwrap();
        for _ in 0..7 {
            it.advance().unwrap();
        }
        let snapshot = it.kappa().to_vec();
        it.advance().unwrap();
        it.retreat().unwrap();
        assert_eq!(it.kappa(), &snapshot[..]);
        it.retreat().unwrap();
        it.advance().unwrap();
        assert_eq!(it.kappa(), &snapshot[..]);
    }

    #[test]
    fn test_partition_apply() {
        let mut it = LexicographicPartition::new(3).unwrap();
        it.advance().unwrap();
        let blocks = it.apply(&[10, 20, 30]).unwrap();
        assert_eq!(blocks, vec![vec![10, 20], vec![30]]);
    }

    #[test]
    fn test_partition_bounds() {
        assert!(LexicographicPartition::new(0).is_err());
        let mut it = LexicographicPartition::new(2).unwrap();
        assert!(it.retreat().is_err());
        it.advance().unwrap();
        assert!(it.advance().is_err());
    }

    #[test]
    fn test_k_partition_counts_match_stirling_numbers() {
        for n in 1..=8usize {
            for k in 1..=n {
                let mut it = LexicographicKPartition::new(n, k).unwrap();
                let mut count = 1u64;
                while it.has_next() {
                    it.advance().unwrap();
                    count += 1;
                    assert_eq!(it.num_blocks(), k);
                }
                assert_eq!(count, stirling2(n, k), "n={} k={}", n, k);
            }
        }
    }

    #[test]
    fn test_k_partition_inversion() {
        let mut it = LexicographicKPartition::new(6, 3).unwrap();
        for _ in 0..10 {
            it.advance().unwrap();
        }
        let snapshot = it.kappa().to_vec();
        it.advance().unwrap();
        it.retreat().unwrap();
        assert_eq!(it.kappa(), &snapshot[..]);
    }

    #[test]
    fn test_k_partition_invalid_arguments() {
        assert!(LexicographicKPartition::new(0, 1).is_err());
        assert!(LexicographicKPartition::new(3, 0).is_err());
        assert!(LexicographicKPartition::new(3, 4).is_err());
    }
}
