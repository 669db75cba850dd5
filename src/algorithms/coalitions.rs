// src/algorithms/coalitions.rs

//! Sample plan for Kernel SHAP: which coalitions to evaluate and how much
//! each one weighs in the regression.
//!
//! Subset sizes are weighted by the Shapley kernel. Small sizes (and their
//! complements) are enumerated exhaustively while the budget allows it; the
//! rest of the budget is spent on randomly drawn coalitions whose weights are
//! fixed up once sampling is over.

use itertools::Itertools;
use ndarray::{Array1, Array2};
use rand::seq::index;
use rand::Rng;
use std::collections::HashMap;

use crate::core::Result;
use crate::utils::RandomChoice;

/// Tolerance of the "budget covers every subset of this size" test.
const FULL_ENUMERATION_SLACK: f64 = 1e-8;
/// Random size draws per remaining sample in one sampling round.
const DRAWS_PER_SAMPLE: usize = 4;

/// A coalition mask packed into 64-bit words, feature `i` at bit `i % 64` of
/// word `i / 64`.
///
/// For masks of up to 64 features the single word is exactly the mask read
/// as a binary number, so distinct masks of one length never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskKey(Vec<u64>);

impl MaskKey {
    pub fn from_mask(mask: &[bool]) -> Self {
        let mut words = vec![0u64; (mask.len() + 63) / 64];
        for (i, _) in mask.iter().enumerate().filter(|(_, present)| **present) {
            words[i / 64] |= 1u64 << (i % 64);
        }
        MaskKey(words)
    }

    /// The integer value of the mask, for masks of at most 64 features.
    pub fn as_u64(&self) -> Option<u64> {
        match self.0.as_slice() {
            [] => Some(0),
            [word] => Some(*word),
            _ => None,
        }
    }
}

/// `n choose k`, saturating at `u64::MAX`.
pub fn binomial(n: usize, k: usize) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        acc = acc * (n - i) as u128 / (i + 1) as u128;
        if acc > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    acc as u64
}

/// Divides every entry by the total, unless the total is zero or not finite.
fn normalize(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if total > 0.0 && total.is_finite() {
        values.iter_mut().for_each(|v| *v /= total);
    }
}

/// Per-explanation bookkeeping over subset sizes `1..=n_subset_sizes`.
#[derive(Debug, Clone)]
pub struct SubsetStatistics {
    pub n_varying: usize,
    /// Sizes beyond the midpoint are complements of smaller ones.
    pub n_subset_sizes: usize,
    /// Sizes whose complement is a different size.
    pub n_paired_subset_sizes: usize,
    /// Normalised kernel weight of each size (index `k - 1`).
    pub size_weights: Vec<f64>,
    /// Weight of the sizes not yet enumerated, renormalised.
    pub remaining_weights: Vec<f64>,
    /// Number of coalitions of each size, counting complements of paired
    /// sizes, saturating at `u64::MAX`.
    pub subset_counts: Vec<u64>,
    pub n_full_subsets: usize,
    pub samples_left: usize,
}

impl SubsetStatistics {
    pub fn new(n_varying: usize, n_samples: usize) -> Self {
        let m = n_varying;
        let n_subset_sizes = m.saturating_sub(1).div_ceil(2);
        let n_paired_subset_sizes = m.saturating_sub(1) / 2;

        let mut size_weights: Vec<f64> = (1..=n_subset_sizes)
            .map(|k| {
                let w = (m - 1) as f64 / (k * (m - k)) as f64;
                if k <= n_paired_subset_sizes {
                    2.0 * w
                } else {
                    w
                }
            })
            .collect();
        normalize(&mut size_weights);

        let subset_counts = (1..=n_subset_sizes)
            .map(|k| {
                let count = binomial(m, k);
                if k <= n_paired_subset_sizes {
                    count.saturating_mul(2)
                } else {
                    count
                }
            })
            .collect();

        SubsetStatistics {
            n_varying,
            n_subset_sizes,
            n_paired_subset_sizes,
            remaining_weights: size_weights.clone(),
            size_weights,
            subset_counts,
            n_full_subsets: 0,
            samples_left: n_samples,
        }
    }

    pub fn is_paired(&self, size: usize) -> bool {
        size <= self.n_paired_subset_sizes
    }

    /// Whether the remaining budget, spread by weight, covers every
    /// coalition of `size`.
    fn covers(&self, size: usize) -> bool {
        let count = self.subset_counts[size - 1] as f64;
        self.samples_left as f64 * self.remaining_weights[size - 1] / count
            >= 1.0 - FULL_ENUMERATION_SLACK
    }

    /// Marks `size` as fully enumerated: spends its budget and moves its
    /// weight out of the remaining pool.
    fn consume(&mut self, size: usize) {
        let count = self.subset_counts[size - 1];
        self.samples_left = self.samples_left.saturating_sub(count.min(usize::MAX as u64) as usize);
        self.n_full_subsets += 1;
        self.remaining_weights[size - 1] = 0.0;
        normalize(&mut self.remaining_weights);
    }

    /// Total kernel weight of the sizes that were not enumerated.
    pub fn weight_left(&self) -> f64 {
        self.size_weights[self.n_full_subsets..].iter().sum()
    }
}

/// One coalition to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct Coalition {
    /// `true` where the explained instance's value is used.
    pub mask: Vec<bool>,
    pub weight: f64,
    /// Weight final at creation (enumerated) rather than provisional
    /// (sampled, rescaled after sampling).
    pub fixed: bool,
}

/// Deduplicated set of coalitions for one explanation.
#[derive(Debug, Clone, Default)]
pub struct CoalitionPlan {
    coalitions: Vec<Coalition>,
    index: HashMap<MaskKey, usize>,
}

impl CoalitionPlan {
    /// Adds a coalition, or adds `weight` to the existing one with the same
    /// mask. Returns the coalition's position and whether it was new.
    pub fn add(&mut self, mask: Vec<bool>, weight: f64, fixed: bool) -> (usize, bool) {
        let key = MaskKey::from_mask(&mask);
        if let Some(&pos) = self.index.get(&key) {
            self.coalitions[pos].weight += weight;
            return (pos, false);
        }
        let pos = self.coalitions.len();
        self.coalitions.push(Coalition {
            mask,
            weight,
            fixed,
        });
        self.index.insert(key, pos);
        (pos, true)
    }

    pub fn len(&self) -> usize {
        self.coalitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coalitions.is_empty()
    }

    pub fn coalitions(&self) -> &[Coalition] {
        &self.coalitions
    }

    pub fn contains(&self, mask: &[bool]) -> bool {
        self.index.contains_key(&MaskKey::from_mask(mask))
    }

    /// 0/1 design matrix, one row per coalition.
    pub fn mask_matrix(&self) -> Array2<f64> {
        let m = self.coalitions.first().map_or(0, |c| c.mask.len());
        Array2::from_shape_fn((self.coalitions.len(), m), |(i, j)| {
            if self.coalitions[i].mask[j] {
                1.0
            } else {
                0.0
            }
        })
    }

    pub fn weights(&self) -> Array1<f64> {
        self.coalitions.iter().map(|c| c.weight).collect()
    }

    /// Scales the provisional weights so that they sum to `total`.
    fn rescale_provisional(&mut self, total: f64) {
        let current: f64 = self
            .coalitions
            .iter()
            .filter(|c| !c.fixed)
            .map(|c| c.weight)
            .sum();
        let factor = total / current;
        if current > 0.0 && factor.is_finite() {
            self.coalitions
                .iter_mut()
                .filter(|c| !c.fixed)
                .for_each(|c| c.weight *= factor);
        }
    }
}

fn complement(mask: &[bool]) -> Vec<bool> {
    mask.iter().map(|present| !present).collect()
}

/// Builds the coalition plan for `n_varying` features within a budget of
/// `n_samples` model evaluations.
pub fn plan_coalitions<R: Rng + ?Sized>(
    n_varying: usize,
    n_samples: usize,
    rng: &mut R,
) -> Result<(CoalitionPlan, SubsetStatistics)> {
    let mut stats = SubsetStatistics::new(n_varying, n_samples);
    let mut plan = CoalitionPlan::default();

    enumerate_full_subsets(&mut stats, &mut plan);
    if stats.n_full_subsets < stats.n_subset_sizes && stats.samples_left > 0 {
        sample_remaining_subsets(&mut stats, &mut plan, rng)?;
    }

    log::debug!(
        "Coalition plan over {} varying features: {} coalitions ({} sizes enumerated of {})",
        n_varying,
        plan.len(),
        stats.n_full_subsets,
        stats.n_subset_sizes
    );
    Ok((plan, stats))
}

fn enumerate_full_subsets(stats: &mut SubsetStatistics, plan: &mut CoalitionPlan) {
    let m = stats.n_varying;
    for size in 1..=stats.n_subset_sizes {
        if !stats.covers(size) {
            break;
        }
        let paired = stats.is_paired(size);
        let mut weight = stats.size_weights[size - 1] / binomial(m, size) as f64;
        if paired {
            weight /= 2.0;
        }
        for present in (0..m).combinations(size) {
            let mut mask = vec![false; m];
            present.iter().for_each(|&i| mask[i] = true);
            if paired {
                plan.add(complement(&mask), weight, true);
            }
            plan.add(mask, weight, true);
        }
        stats.consume(size);
    }
    normalize(&mut stats.remaining_weights);
}

fn sample_remaining_subsets<R: Rng + ?Sized>(
    stats: &mut SubsetStatistics,
    plan: &mut CoalitionPlan,
    rng: &mut R,
) -> Result<()> {
    let m = stats.n_varying;
    let first_size = stats.n_full_subsets + 1;

    // a paired draw yields two coalitions, so paired sizes are drawn half as often
    let mut draw_weights: Vec<f64> = (first_size..=stats.n_subset_sizes)
        .map(|size| {
            let w = stats.size_weights[size - 1];
            if stats.is_paired(size) {
                w / 2.0
            } else {
                w
            }
        })
        .collect();
    normalize(&mut draw_weights);
    let sizes = RandomChoice::new((first_size..=stats.n_subset_sizes).collect(), draw_weights)?;

    while stats.samples_left > 0 {
        for size in sizes.sample(DRAWS_PER_SAMPLE * stats.samples_left, rng) {
            if stats.samples_left == 0 {
                break;
            }
            let mut mask = vec![false; m];
            index::sample(rng, m, size)
                .into_iter()
                .for_each(|i| mask[i] = true);

            let paired_mask = stats.is_paired(size).then(|| complement(&mask));
            let (_, new) = plan.add(mask, 1.0, false);
            if new {
                stats.samples_left -= 1;
            }
            if let Some(paired_mask) = paired_mask.filter(|_| stats.samples_left > 0) {
                let (_, new_complement) = plan.add(paired_mask, 1.0, false);
                if new_complement {
                    stats.samples_left -= 1;
                }
            }
        }
    }

    plan.rescale_provisional(stats.weight_left());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn binomials() {
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(10, 0), 1);
        assert_eq!(binomial(3, 4), 0);
        assert_eq!(binomial(60, 30), 118_264_581_564_861_424);
        assert_eq!(binomial(200, 100), u64::MAX);
    }

    #[test]
    fn subset_sizes_and_pairing() {
        let odd = SubsetStatistics::new(5, 100);
        assert_eq!(odd.n_subset_sizes, 2);
        assert_eq!(odd.n_paired_subset_sizes, 2);
        assert_eq!(odd.subset_counts, vec![10, 20]);

        let even = SubsetStatistics::new(4, 100);
        assert_eq!(even.n_subset_sizes, 2);
        assert_eq!(even.n_paired_subset_sizes, 1);
        assert!(even.is_paired(1));
        assert!(!even.is_paired(2));
        assert_eq!(even.subset_counts, vec![8, 6]);
    }

    #[test]
    fn size_weights_sum_to_one() {
        for m in 2..40 {
            let stats = SubsetStatistics::new(m, 1000);
            let total: f64 = stats.size_weights.iter().sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        }
        // m = 4: raw weights 2 * 3/3 = 2 and 3/4, normalised
        let stats = SubsetStatistics::new(4, 10);
        assert_abs_diff_eq!(stats.size_weights[0], 2.0 / 2.75, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.size_weights[1], 0.75 / 2.75, epsilon = 1e-12);
    }

    #[test]
    fn remaining_weights_renormalise_after_enumeration() {
        let mut rng = StdRng::seed_from_u64(3);
        let (_, stats) = plan_coalitions(10, 100, &mut rng).unwrap();
        assert!(stats.n_full_subsets >= 1);
        assert!(stats.n_full_subsets < stats.n_subset_sizes);
        let remaining: f64 = stats.remaining_weights.iter().sum();
        assert_abs_diff_eq!(remaining, 1.0, epsilon = 1e-12);
        for size in 1..=stats.n_full_subsets {
            assert_eq!(stats.remaining_weights[size - 1], 0.0);
        }
    }

    #[test]
    fn small_problems_are_fully_enumerated() {
        let mut rng = StdRng::seed_from_u64(0);
        let (plan, stats) = plan_coalitions(3, 6, &mut rng).unwrap();
        assert_eq!(stats.n_full_subsets, stats.n_subset_sizes);
        assert_eq!(plan.len(), 6);
        assert!(plan.coalitions().iter().all(|c| c.fixed));
        let total: f64 = plan.coalitions().iter().map(|c| c.weight).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        assert!(plan.contains(&[true, false, false]));
        assert!(plan.contains(&[false, true, true]));
        assert!(!plan.contains(&[true, true, true]));
    }

    #[test]
    fn sampled_plan_respects_budget_and_weights() {
        let mut rng = StdRng::seed_from_u64(11);
        let budget = 300;
        let (plan, stats) = plan_coalitions(12, budget, &mut rng).unwrap();
        assert_eq!(plan.len(), budget);
        assert_eq!(stats.samples_left, 0);

        let fixed: f64 = plan.coalitions().iter().filter(|c| c.fixed).map(|c| c.weight).sum();
        let provisional: f64 = plan.coalitions().iter().filter(|c| !c.fixed).map(|c| c.weight).sum();
        assert_abs_diff_eq!(provisional, stats.weight_left(), epsilon = 1e-9);
        assert_abs_diff_eq!(fixed + provisional, 1.0, epsilon = 1e-9);

        // no empty or full coalitions, and no duplicates
        let mut seen = std::collections::HashSet::new();
        for c in plan.coalitions() {
            let present = c.mask.iter().filter(|p| **p).count();
            assert!(present > 0 && present < 12);
            assert!(seen.insert(c.mask.clone()));
        }
        assert_eq!(plan.mask_matrix().dim(), (budget, 12));
        assert_eq!(plan.weights().len(), budget);
    }

    #[test]
    fn collisions_accumulate_weight() {
        let mut plan = CoalitionPlan::default();
        let (first, new) = plan.add(vec![true, false], 1.0, false);
        assert!(new);
        let (again, new) = plan.add(vec![true, false], 1.0, false);
        assert!(!new);
        assert_eq!(first, again);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.coalitions()[0].weight, 2.0);
    }

    #[test]
    fn wide_masks_use_several_words() {
        let mut mask = vec![false; 130];
        mask[129] = true;
        let key = MaskKey::from_mask(&mask);
        assert_eq!(key.as_u64(), None);
        assert_ne!(key, MaskKey::from_mask(&vec![false; 130]));
        assert_eq!(MaskKey::from_mask(&[true, false, true]).as_u64(), Some(0b101));
    }

    proptest! {
        #[test]
        fn mask_key_is_the_binary_number(bits in proptest::collection::vec(any::<bool>(), 1..64)) {
            let expected = bits
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, b)| if *b { acc | (1 << i) } else { acc });
            prop_assert_eq!(MaskKey::from_mask(&bits).as_u64(), Some(expected));
        }

        #[test]
        fn distinct_masks_have_distinct_keys(
            a in proptest::collection::vec(any::<bool>(), 100),
            b in proptest::collection::vec(any::<bool>(), 100),
        ) {
            prop_assert_eq!(a == b, MaskKey::from_mask(&a) == MaskKey::from_mask(&b));
        }
    }
}
