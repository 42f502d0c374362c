// Fold generation for cross-validation
// Stratified repeated random splits or exhaustive leave-one-out

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::Label;

#[derive(Debug, Error)]
pub enum FoldError {
    #[error("At least one split is required")]
    ZeroSplits,

    #[error("Test fraction must lie in (0, 1), got {0}")]
    InvalidTestFraction(f64),

    #[error("Cannot split {n_trials} trials ({n_positive} positive, {n_negative} negative): {reason}")]
    TooFewTrials {
        n_trials: usize,
        n_positive: usize,
        n_negative: usize,
        reason: &'static str,
    },
}

/// How trials are partitioned into train/test folds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FoldStrategy {
    /// `n_splits` independent class-stratified random splits
    StratifiedShuffle {
        n_splits: usize,
        test_fraction: f64,
        seed: u64,
    },

    /// One fold per trial, holding out that trial alone
    LeaveOneOut,
}

impl Default for FoldStrategy {
    fn default() -> Self {
        FoldStrategy::StratifiedShuffle {
            n_splits: 20,
            test_fraction: 0.1,
            seed: 1337,
        }
    }
}

/// Train/test indices of one fold, each sorted ascending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl FoldStrategy {
    /// True when every fold holds out a single trial
    pub fn is_leave_one_out(&self) -> bool {
        matches!(self, FoldStrategy::LeaveOneOut)
    }

    /// Check split count and test fraction
    pub fn validate(&self) -> Result<(), FoldError> {
        match *self {
            FoldStrategy::StratifiedShuffle {
                n_splits,
                test_fraction,
                ..
            } => {
                if n_splits == 0 {
                    return Err(FoldError::ZeroSplits);
                }
                if !(test_fraction > 0.0 && test_fraction < 1.0) {
                    return Err(FoldError::InvalidTestFraction(test_fraction));
                }
                Ok(())
            }
            FoldStrategy::LeaveOneOut => Ok(()),
        }
    }

    /// Generate folds for the given trial labels
    ///
    /// The same strategy and labels always yield the same folds.
    pub fn generate(&self, labels: &[Label]) -> Result<Vec<Fold>, FoldError> {
        self.validate()?;
        match *self {
            FoldStrategy::StratifiedShuffle {
                n_splits,
                test_fraction,
                seed,
            } => stratified_shuffle(labels, n_splits, test_fraction, seed),
            FoldStrategy::LeaveOneOut => leave_one_out(labels),
        }
    }
}

fn too_few(labels: &[Label], reason: &'static str) -> FoldError {
    let n_positive = labels.iter().filter(|&&l| l == Label::Positive).count();
    FoldError::TooFewTrials {
        n_trials: labels.len(),
        n_positive,
        n_negative: labels.len() - n_positive,
        reason,
    }
}

fn leave_one_out(labels: &[Label]) -> Result<Vec<Fold>, FoldError> {
    let n = labels.len();
    if n < 2 {
        return Err(too_few(labels, "leave-one-out needs at least 2 trials"));
    }
    Ok((0..n)
        .map(|held_out| Fold {
            train: (0..n).filter(|&i| i != held_out).collect(),
            test: vec![held_out],
        })
        .collect())
}

/// Number of test trials drawn from each class
///
/// Proportional allocation with largest-remainder rounding; every class
/// keeps at least one training trial.
fn allocate_test(class_sizes: [usize; 2], n_test: usize) -> Option<[usize; 2]> {
    let n: usize = class_sizes.iter().sum();
    let quotas = class_sizes.map(|c| n_test as f64 * c as f64 / n as f64);
    let mut alloc = quotas.map(|q| q.floor() as usize);

    let mut order = [0usize, 1];
    order.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.total_cmp(&ra)
    });
    let mut remaining = n_test - alloc.iter().sum::<usize>();
    for &k in order.iter().cycle() {
        if remaining == 0 {
            break;
        }
        alloc[k] += 1;
        remaining -= 1;
    }

    for k in 0..2 {
        let cap = class_sizes[k].saturating_sub(1);
        if alloc[k] > cap {
            let excess = alloc[k] - cap;
            alloc[k] = cap;
            alloc[1 - k] += excess;
        }
    }
    (0..2).all(|k| alloc[k] < class_sizes[k]).then_some(alloc)
}

fn stratified_shuffle(
    labels: &[Label],
    n_splits: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<Fold>, FoldError> {
    let mut by_class: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, label) in labels.iter().enumerate() {
        by_class[label.index()].push(i);
    }
    if by_class.iter().any(|c| c.is_empty()) {
        return Err(too_few(labels, "both classes must be present"));
    }

    let n = labels.len();
    let n_test = ((test_fraction * n as f64) - 1e-9).ceil().max(1.0) as usize;
    let alloc = allocate_test([by_class[0].len(), by_class[1].len()], n_test)
        .ok_or_else(|| too_few(labels, "test split would exhaust a class"))?;

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut folds = Vec::with_capacity(n_splits);
    for _ in 0..n_splits {
        let mut train = Vec::with_capacity(n - n_test);
        let mut test = Vec::with_capacity(n_test);
        for (k, members) in by_class.iter().enumerate() {
            let mut shuffled = members.clone();
            shuffled.shuffle(&mut rng);
            let (held_out, kept) = shuffled.split_at(alloc[k]);
            test.extend_from_slice(held_out);
            train.extend_from_slice(kept);
        }
        train.sort_unstable();
        test.sort_unstable();
        folds.push(Fold { train, test });
    }
    Ok(folds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n_positive: usize, n_negative: usize) -> Vec<Label> {
        let mut labels = vec![Label::Positive; n_positive];
        labels.extend(vec![Label::Negative; n_negative]);
        labels
    }

    #[test]
    fn test_default_strategy() {
        assert_eq!(
            FoldStrategy::default(),
            FoldStrategy::StratifiedShuffle {
                n_splits: 20,
                test_fraction: 0.1,
                seed: 1337
            }
        );
    }

    #[test]
    fn test_stratified_shuffle_keeps_class_ratio() {
        let labels = labels(30, 70);
        let folds = FoldStrategy::default().generate(&labels).unwrap();
        assert_eq!(folds.len(), 20);

        for fold in &folds {
            assert_eq!(fold.test.len(), 10);
            assert_eq!(fold.train.len(), 90);
            let positives = fold.test.iter().filter(|&&i| labels[i] == Label::Positive).count();
            assert_eq!(positives, 3);

            let mut all: Vec<usize> = fold.train.iter().chain(&fold.test).copied().collect();
            all.sort_unstable();
            assert_eq!(all, (0..100).collect::<Vec<_>>());
            assert!(fold.train.windows(2).all(|w| w[0] < w[1]));
            assert!(fold.test.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_stratified_shuffle_is_deterministic() {
        let labels = labels(12, 28);
        let a = FoldStrategy::default().generate(&labels).unwrap();
        let b = FoldStrategy::default().generate(&labels).unwrap();
        assert_eq!(a, b);

        let other_seed = FoldStrategy::StratifiedShuffle {
            n_splits: 20,
            test_fraction: 0.1,
            seed: 7,
        };
        assert_ne!(a, other_seed.generate(&labels).unwrap());
    }

    #[test]
    fn test_splits_differ_across_repetitions() {
        let labels = labels(20, 20);
        let folds = FoldStrategy::default().generate(&labels).unwrap();
        assert!(folds.iter().any(|f| f.test != folds[0].test));
    }

    #[test]
    fn test_small_class_keeps_a_training_trial() {
        // 1 positive in 4: allocation would otherwise put it in the test set
        let alloc = allocate_test([1, 3], 2).unwrap();
        assert_eq!(alloc, [0, 2]);

        assert_eq!(allocate_test([2, 2], 2), Some([1, 1]));
        // 3 of 4 held out would leave a class without training data
        assert_eq!(allocate_test([2, 2], 3), None);
    }

    #[test]
    fn test_largest_remainder_allocation() {
        // 33 test trials from 50/50: quotas 16.5 each, first class wins the tie
        assert_eq!(allocate_test([50, 50], 33), Some([17, 16]));
        // 7 test trials from 25/75: quotas 1.75/5.25
        assert_eq!(allocate_test([25, 75], 7), Some([2, 5]));
    }

    #[test]
    fn test_leave_one_out() {
        let labels = labels(4, 6);
        let folds = FoldStrategy::LeaveOneOut.generate(&labels).unwrap();
        assert_eq!(folds.len(), 10);
        for (i, fold) in folds.iter().enumerate() {
            assert_eq!(fold.test, vec![i]);
            assert_eq!(fold.train.len(), 9);
            assert!(!fold.train.contains(&i));
        }
    }

    #[test]
    fn test_invalid_strategies() {
        let zero = FoldStrategy::StratifiedShuffle {
            n_splits: 0,
            test_fraction: 0.1,
            seed: 1,
        };
        assert!(matches!(zero.validate(), Err(FoldError::ZeroSplits)));

        let fraction = FoldStrategy::StratifiedShuffle {
            n_splits: 5,
            test_fraction: 1.0,
            seed: 1,
        };
        assert!(matches!(
            fraction.validate(),
            Err(FoldError::InvalidTestFraction(_))
        ));
    }

    #[test]
    fn test_single_class_cannot_be_stratified() {
        let labels = labels(0, 10);
        assert!(matches!(
            FoldStrategy::default().generate(&labels),
            Err(FoldError::TooFewTrials { n_positive: 0, .. })
        ));
        assert!(FoldStrategy::LeaveOneOut.generate(&labels[..1]).is_err());
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&FoldStrategy::LeaveOneOut).unwrap();
        assert_eq!(json, r#"{"kind":"leave_one_out"}"#);

        let parsed: FoldStrategy = serde_json::from_str(
            r#"{"kind":"stratified_shuffle","n_splits":5,"test_fraction":0.2,"seed":3}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            FoldStrategy::StratifiedShuffle {
                n_splits: 5,
                test_fraction: 0.2,
                seed: 3
            }
        );
    }
}
