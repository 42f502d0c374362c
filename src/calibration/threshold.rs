// Decision-threshold calibration
// Sweeps a fixed threshold grid over pooled scores and picks a constrained operating point

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::Label;
use crate::validation::{ConfusionMatrix, NormalizedConfusion};

/// Number of equally spaced thresholds swept over [0, 1]
pub const N_THRESHOLDS: usize = 100;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("{scores} scores but {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },

    #[error("Pooled labels contain no {0:?} samples")]
    MissingClass(Label),

    #[error("Score {index} is not finite")]
    NonFiniteScore { index: usize },

    #[error(
        "No threshold reaches FPR < {max_fpr} (swept FPR range [{min_fpr:.3}, {max_fpr_seen:.3}]); \
         relax the false-positive budget"
    )]
    NoOperatingPoint {
        max_fpr: f64,
        min_fpr: f64,
        max_fpr_seen: f64,
    },
}

/// One swept threshold and the decisions it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub threshold: f64,
    pub tpr: f64,
    pub fpr: f64,
    pub counts: ConfusionMatrix,
    pub confusion: NormalizedConfusion,
}

/// Full sweep plus the selected operating point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Trapezoid area under the swept ROC points
    pub auc: f64,

    /// Index of `best` in `curve`
    pub best_index: usize,

    pub best: OperatingPoint,

    /// One point per threshold, in sweep order
    pub curve: Vec<OperatingPoint>,
}

/// `i / 99` for `i in 0..100`
pub fn threshold_grid() -> impl Iterator<Item = f64> {
    (0..N_THRESHOLDS).map(|i| i as f64 / (N_THRESHOLDS - 1) as f64)
}

/// Classifies a pooled score as positive when it is below the threshold
/// (scores are negative-class probabilities)
#[derive(Debug, Clone, Copy)]
pub struct ThresholdCalibrator {
    max_fpr: f64,
}

impl ThresholdCalibrator {
    /// Calibrator with a false-positive budget
    pub fn new(max_fpr: f64) -> Self {
        ThresholdCalibrator { max_fpr }
    }

    /// Maximum tolerated false-positive rate
    pub fn max_fpr(&self) -> f64 {
        self.max_fpr
    }

    /// Sweep every threshold over `scores`
    pub fn sweep(&self, scores: &[f64], labels: &[Label]) -> Result<Vec<OperatingPoint>, CalibrationError> {
        check_inputs(scores, labels)?;
        Ok(threshold_grid()
            .map(|threshold| {
                let mut counts = ConfusionMatrix::default();
                for (&score, &truth) in scores.iter().zip(labels) {
                    let predicted = if score < threshold {
                        Label::Positive
                    } else {
                        Label::Negative
                    };
                    counts.record(truth, predicted);
                }
                let confusion = counts.normalized();
                OperatingPoint {
                    threshold,
                    tpr: confusion.tpr(),
                    fpr: confusion.fpr(),
                    counts,
                    confusion,
                }
            })
            .collect())
    }

    /// Sweep, integrate and select the best operating point
    ///
    /// Selection: among points with FPR strictly below `max_fpr` take the
    /// highest TPR; among all points with that TPR take the lowest FPR; the
    /// first threshold meeting both is chosen.
    pub fn calibrate(&self, scores: &[f64], labels: &[Label]) -> Result<Calibration, CalibrationError> {
        let curve = self.sweep(scores, labels)?;
        let auc = area_under_curve(&curve);
        let best_index = self.select(&curve)?;

        Ok(Calibration {
            auc,
            best_index,
            best: curve[best_index].clone(),
            curve,
        })
    }

    fn select(&self, curve: &[OperatingPoint]) -> Result<usize, CalibrationError> {
        let max_tpr = curve
            .iter()
            .filter(|p| p.fpr < self.max_fpr)
            .map(|p| p.tpr)
            .max_by(f64::total_cmp);

        let Some(max_tpr) = max_tpr else {
            let fprs = curve.iter().map(|p| p.fpr);
            return Err(CalibrationError::NoOperatingPoint {
                max_fpr: self.max_fpr,
                min_fpr: fprs.clone().fold(f64::INFINITY, f64::min),
                max_fpr_seen: fprs.fold(f64::NEG_INFINITY, f64::max),
            });
        };

        let tpr_matches: Vec<usize> = (0..curve.len()).filter(|&i| curve[i].tpr == max_tpr).collect();
        let min_fpr = tpr_matches
            .iter()
            .map(|&i| curve[i].fpr)
            .fold(f64::INFINITY, f64::min);

        tpr_matches
            .into_iter()
            .find(|&i| curve[i].fpr == min_fpr)
            .ok_or(CalibrationError::NoOperatingPoint {
                max_fpr: self.max_fpr,
                min_fpr,
                max_fpr_seen: min_fpr,
            })
    }
}

fn check_inputs(scores: &[f64], labels: &[Label]) -> Result<(), CalibrationError> {
    if scores.len() != labels.len() {
        return Err(CalibrationError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(CalibrationError::NonFiniteScore { index });
    }
    for label in Label::ALL {
        if !labels.contains(&label) {
            return Err(CalibrationError::MissingClass(label));
        }
    }
    Ok(())
}

/// Trapezoid rule over (FPR, TPR) in sweep order
fn area_under_curve(curve: &[OperatingPoint]) -> f64 {
    curve
        .windows(2)
        .map(|pair| (pair[1].fpr - pair[0].fpr) * (pair[1].tpr + pair[0].tpr) / 2.0)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// Overlapping score distributions: positives low, negatives high
    fn noisy(n: usize, seed: u64) -> (Vec<f64>, Vec<Label>) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut scores = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            if i % 2 == 0 {
                scores.push(rng.random_range(0.0..0.7));
                labels.push(Label::Positive);
            } else {
                scores.push(rng.random_range(0.3..1.0));
                labels.push(Label::Negative);
            }
        }
        (scores, labels)
    }

    #[test]
    fn test_threshold_grid() {
        let grid: Vec<f64> = threshold_grid().collect();
        assert_eq!(grid.len(), 100);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[99], 1.0);
        assert!((grid[1] - 1.0 / 99.0).abs() < 1e-15);
    }

    #[test]
    fn test_separable_scores_reach_perfect_point() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let mut scores = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..50 {
            scores.push(rng.random_range(0.0..0.3));
            labels.push(Label::Positive);
            scores.push(rng.random_range(0.7..1.0));
            labels.push(Label::Negative);
        }

        let calibration = ThresholdCalibrator::new(0.15).calibrate(&scores, &labels).unwrap();
        assert_eq!(calibration.best.tpr, 1.0);
        assert_eq!(calibration.best.fpr, 0.0);
        assert!(calibration.best.threshold > 0.29 && calibration.best.threshold < 0.71);
        assert!((calibration.auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_scores() {
        let scores = vec![0.5; 40];
        let labels: Vec<Label> = (0..40)
            .map(|i| if i < 20 { Label::Positive } else { Label::Negative })
            .collect();

        let curve = ThresholdCalibrator::new(0.5).sweep(&scores, &labels).unwrap();
        let below: Vec<&OperatingPoint> = curve.iter().filter(|p| p.threshold < 0.5).collect();
        let above: Vec<&OperatingPoint> = curve.iter().filter(|p| p.threshold > 0.5).collect();
        assert_eq!(below.len() + above.len(), 100);
        assert!(below.iter().all(|p| p.counts == below[0].counts));
        assert!(above.iter().all(|p| p.counts == above[0].counts));
        assert_eq!(below[0].counts.counts(), [[0, 20], [0, 20]]);
        assert_eq!(above[0].counts.counts(), [[20, 0], [20, 0]]);

        let calibration = ThresholdCalibrator::new(0.5).calibrate(&scores, &labels).unwrap();
        assert!((calibration.auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_fpr_budget_has_no_operating_point() {
        let (scores, labels) = noisy(60, 3);
        let result = ThresholdCalibrator::new(0.0).calibrate(&scores, &labels);
        match result {
            Err(CalibrationError::NoOperatingPoint {
                max_fpr,
                min_fpr,
                max_fpr_seen,
            }) => {
                assert_eq!(max_fpr, 0.0);
                assert_eq!(min_fpr, 0.0);
                assert!(max_fpr_seen > 0.9);
            }
            other => panic!("expected NoOperatingPoint, got {:?}", other),
        }
    }

    #[test]
    fn test_best_tpr_monotone_in_fpr_budget() {
        let (scores, labels) = noisy(200, 5);
        let mut previous = 0.0;
        for step in 1..=20 {
            let max_fpr = step as f64 * 0.05;
            let calibration = ThresholdCalibrator::new(max_fpr).calibrate(&scores, &labels).unwrap();
            assert!(calibration.best.fpr < max_fpr);
            assert!(calibration.best.tpr >= previous);
            previous = calibration.best.tpr;
        }
    }

    #[test]
    fn test_auc_bounds() {
        for seed in 0..10 {
            let (scores, labels) = noisy(50, seed);
            let calibration = ThresholdCalibrator::new(0.3).calibrate(&scores, &labels).unwrap();
            assert!((0.0..=1.0).contains(&calibration.auc));
        }

        // Inverted scores still stay in bounds
        let (scores, labels) = noisy(50, 99);
        let inverted: Vec<f64> = scores.iter().map(|s| 1.0 - s).collect();
        let auc = area_under_curve(&ThresholdCalibrator::new(1.0).sweep(&inverted, &labels).unwrap());
        assert!((0.0..=1.0).contains(&auc));
        assert!(auc < 0.5);
    }

    #[test]
    fn test_curve_rows_are_normalized() {
        let (scores, labels) = noisy(30, 8);
        let curve = ThresholdCalibrator::new(0.2).sweep(&scores, &labels).unwrap();
        for point in curve {
            for row in point.confusion.rows {
                assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_first_threshold_wins_ties() {
        let scores = [0.2, 0.3, 0.6, 0.95];
        let labels = [Label::Positive, Label::Positive, Label::Negative, Label::Negative];
        let calibration = ThresholdCalibrator::new(0.6).calibrate(&scores, &labels).unwrap();

        // Thresholds 30/99 through 59/99 all give TPR 1 at FPR 0
        assert_eq!(calibration.best_index, 30);
        assert_eq!(calibration.best.tpr, 1.0);
        assert_eq!(calibration.best.fpr, 0.0);
    }

    #[test]
    fn test_input_validation() {
        let calibrator = ThresholdCalibrator::new(0.2);
        assert!(matches!(
            calibrator.calibrate(&[0.1, 0.2], &[Label::Positive]),
            Err(CalibrationError::LengthMismatch { scores: 2, labels: 1 })
        ));
        assert!(matches!(
            calibrator.calibrate(&[0.1, 0.2], &[Label::Positive, Label::Positive]),
            Err(CalibrationError::MissingClass(Label::Negative))
        ));
        assert!(matches!(
            calibrator.calibrate(&[0.1, f64::NAN], &[Label::Positive, Label::Negative]),
            Err(CalibrationError::NonFiniteScore { index: 1 })
        ));
    }
}
