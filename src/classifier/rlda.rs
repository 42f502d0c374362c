// Regularized linear discriminant analysis
// Shrinks the pooled class covariance toward a scaled identity

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::classifier::backend::{split_by_label, Classifier, ClassifierError};
use crate::recording::Label;

/// Singular values below this (relative) are treated as zero when inverting
const PINV_EPSILON: f64 = 1e-10;

/// Two-class LDA with covariance shrinkage
///
/// The discriminant is `z = w.x + b` with `w` pointing from the positive to
/// the negative class mean; `p(negative) = sigmoid(z)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rlda {
    /// Shrinkage coefficient in [0, 1]
    reg_coeff: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    weights: Option<DVector<f64>>,

    bias: f64,
}

impl Rlda {
    /// Unfitted classifier; `fit` rejects coefficients outside [0, 1]
    pub fn new(reg_coeff: f64) -> Self {
        Rlda {
            reg_coeff,
            weights: None,
            bias: 0.0,
        }
    }

    /// Shrinkage coefficient as given
    pub fn reg_coeff(&self) -> f64 {
        self.reg_coeff
    }

    pub fn is_fitted(&self) -> bool {
        self.weights.is_some()
    }

    /// Discriminant weights, `None` before fit
    pub fn weights(&self) -> Option<&DVector<f64>> {
        self.weights.as_ref()
    }

    /// Discriminant value per row
    fn decision(&self, features: &DMatrix<f64>) -> Result<DVector<f64>, ClassifierError> {
        let weights = self.weights.as_ref().ok_or(ClassifierError::NotFitted)?;
        if features.ncols() != weights.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: weights.len(),
                actual: features.ncols(),
            });
        }
        Ok((features * weights).add_scalar(self.bias))
    }
}

fn class_mean(features: &DMatrix<f64>, rows: &[usize]) -> DVector<f64> {
    let mut mean = DVector::zeros(features.ncols());
    for &r in rows {
        mean += features.row(r).transpose();
    }
    mean / rows.len() as f64
}

/// Unbiased covariance of the selected rows (zero for a single row)
fn class_covariance(features: &DMatrix<f64>, rows: &[usize], mean: &DVector<f64>) -> DMatrix<f64> {
    let d = features.ncols();
    let mut cov = DMatrix::zeros(d, d);
    for &r in rows {
        let diff = features.row(r).transpose() - mean;
        cov += &diff * diff.transpose();
    }
    if rows.len() > 1 {
        cov / (rows.len() - 1) as f64
    } else {
        cov
    }
}

impl Classifier for Rlda {
    fn fit(&mut self, features: &DMatrix<f64>, labels: &[Label]) -> Result<(), ClassifierError> {
        if !(0.0..=1.0).contains(&self.reg_coeff) {
            return Err(ClassifierError::InvalidRegularization(self.reg_coeff));
        }
        let [positive, negative] = split_by_label(features, labels)?;
        let d = features.ncols();

        let mu_pos = class_mean(features, &positive);
        let mu_neg = class_mean(features, &negative);

        let pooled = (class_covariance(features, &positive, &mu_pos)
            + class_covariance(features, &negative, &mu_neg))
            * 0.5;
        let target = pooled.trace() / d.max(1) as f64;
        let shrunk = pooled * (1.0 - self.reg_coeff)
            + DMatrix::identity(d, d) * (self.reg_coeff * target);

        let inverse = shrunk
            .pseudo_inverse(PINV_EPSILON)
            .map_err(|e| ClassifierError::Numerical(e.to_string()))?;

        let weights = inverse * (&mu_neg - &mu_pos);
        let midpoint = (&mu_pos + &mu_neg) * 0.5;
        self.bias = -weights.dot(&midpoint);
        self.weights = Some(weights);
        Ok(())
    }

    fn predict(&self, features: &DMatrix<f64>) -> Result<Vec<Label>, ClassifierError> {
        Ok(self
            .decision(features)?
            .iter()
            .map(|&z| if z > 0.0 { Label::Negative } else { Label::Positive })
            .collect())
    }

    fn predict_proba(&self, features: &DMatrix<f64>) -> Result<Vec<[f64; 2]>, ClassifierError> {
        Ok(self
            .decision(features)?
            .iter()
            .map(|&z| {
                let negative = 1.0 / (1.0 + (-z).exp());
                [1.0 - negative, negative]
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Positive samples around (-2, 0), negative around (2, 0)
    fn blobs() -> (DMatrix<f64>, Vec<Label>) {
        let offsets = [(-0.3, 0.2), (0.1, -0.4), (0.4, 0.3), (-0.2, -0.1), (0.0, 0.5)];
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for (label, center) in [(Label::Positive, -2.0), (Label::Negative, 2.0)] {
            for (dx, dy) in offsets {
                rows.push(center + dx);
                rows.push(dy);
                labels.push(label);
            }
        }
        (DMatrix::from_row_slice(10, 2, &rows), labels)
    }

    #[test]
    fn test_rlda_separates_blobs() {
        let (features, labels) = blobs();
        let mut classifier = Rlda::new(0.1);
        classifier.fit(&features, &labels).unwrap();

        assert_eq!(classifier.predict(&features).unwrap(), labels);

        let query = DMatrix::from_row_slice(2, 2, &[-2.0, 0.0, 2.0, 0.0]);
        let probs = classifier.predict_proba(&query).unwrap();
        assert!(probs[0][Label::Positive.index()] > 0.9);
        assert!(probs[1][Label::Negative.index()] > 0.9);
        for pair in probs {
            assert!((pair[0] + pair[1] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_full_shrinkage_follows_mean_difference() {
        let (features, labels) = blobs();
        let mut classifier = Rlda::new(1.0);
        classifier.fit(&features, &labels).unwrap();

        // Identity covariance: weights parallel to mu_neg - mu_pos
        let weights = classifier.weights().unwrap();
        let mu_pos = class_mean(&features, &[0, 1, 2, 3, 4]);
        let mu_neg = class_mean(&features, &[5, 6, 7, 8, 9]);
        let direction = &mu_neg - &mu_pos;
        let cross = weights[0] * direction[1] - weights[1] * direction[0];
        assert!(cross.abs() < 1e-9);
        assert!(weights.dot(&direction) > 0.0);
    }

    #[test]
    fn test_rlda_requires_fit() {
        let classifier = Rlda::new(0.5);
        assert!(matches!(
            classifier.predict(&DMatrix::zeros(1, 2)),
            Err(ClassifierError::NotFitted)
        ));
    }

    #[test]
    fn test_rlda_dimension_check() {
        let (features, labels) = blobs();
        let mut classifier = Rlda::new(0.0);
        classifier.fit(&features, &labels).unwrap();
        assert!(matches!(
            classifier.predict_proba(&DMatrix::zeros(1, 3)),
            Err(ClassifierError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_rlda_handles_more_features_than_trials() {
        // 4 trials, 6 features: pooled covariance is rank 2
        let rows = [
            1.0, 0.0, 0.5, 0.0, 0.1, 0.0, //
            1.2, 0.1, 0.4, 0.0, 0.0, 0.1, //
            -1.0, 0.0, -0.5, 0.1, 0.0, 0.0, //
            -1.1, 0.1, -0.6, 0.0, 0.1, 0.0,
        ];
        let features = DMatrix::from_row_slice(4, 6, &rows);
        let labels = [Label::Positive, Label::Positive, Label::Negative, Label::Negative];

        let mut classifier = Rlda::new(0.1);
        classifier.fit(&features, &labels).unwrap();
        assert_eq!(classifier.predict(&features).unwrap(), labels.to_vec());
    }

    #[test]
    fn test_rlda_serialization() {
        let (features, labels) = blobs();
        let mut classifier = Rlda::new(0.3);
        classifier.fit(&features, &labels).unwrap();

        let json = serde_json::to_vec(&classifier).unwrap();
        let restored: Rlda = serde_json::from_slice(&json).unwrap();
        assert_eq!(
            restored.predict_proba(&features).unwrap(),
            classifier.predict_proba(&features).unwrap()
        );
    }

    #[test]
    fn test_out_of_range_reg_coeff_is_rejected() {
        let (features, labels) = blobs();
        for reg_coeff in [1.7, -0.2, f64::NAN] {
            let mut rlda = Rlda::new(reg_coeff);
            assert!(matches!(
                rlda.fit(&features, &labels),
                Err(ClassifierError::InvalidRegularization(_))
            ));
            assert!(!rlda.is_fitted());
        }
        assert_eq!(Rlda::new(1.7).reg_coeff(), 1.7);
    }
}
