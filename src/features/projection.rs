// Variance-retaining orthogonal projection (PCA)
// Fit on a training partition, applied unchanged to its paired test partition

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::features::extractor::FeatureError;

/// Principal-component projection learned from a training feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Per-feature training mean
    mean: DVector<f64>,

    /// Retained components, one per row (k x n_features)
    components: DMatrix<f64>,

    /// Fraction of training variance explained by each retained component
    explained_variance_ratio: Vec<f64>,
}

impl Projection {
    /// Fit on `features` (trials x features), keeping the fewest leading
    /// components whose cumulative explained variance exceeds `target`
    ///
    /// Component signs are fixed: each vector is oriented so that its
    /// largest-magnitude entry is positive, then the whole set is inverted.
    /// The inversion is a compatibility convention of deployed classifiers.
    pub fn fit(features: &DMatrix<f64>, target: f64) -> Result<Self, FeatureError> {
        let (n_trials, n_features) = features.shape();
        if n_trials < 2 || n_features == 0 {
            return Err(FeatureError::DegenerateFeatures(format!(
                "need at least 2 trials and 1 feature, got {}x{}",
                n_trials, n_features
            )));
        }

        let mean = DVector::from_iterator(
            n_features,
            features.column_iter().map(|col| col.mean()),
        );
        let centered = center(features, &mean);

        let svd = centered.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| FeatureError::DegenerateFeatures("SVD did not converge".to_string()))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

        let variances: Vec<f64> = order
            .iter()
            .map(|&i| svd.singular_values[i].powi(2) / (n_trials - 1) as f64)
            .collect();
        let total: f64 = variances.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(FeatureError::DegenerateFeatures(
                "training features have zero variance".to_string(),
            ));
        }

        let ratios: Vec<f64> = variances.iter().map(|v| v / total).collect();
        let mut cumulative = 0.0;
        let mut n_keep = ratios.len();
        for (i, ratio) in ratios.iter().enumerate() {
            cumulative += ratio;
            if cumulative > target {
                n_keep = i + 1;
                break;
            }
        }

        let mut components = DMatrix::zeros(n_keep, n_features);
        for (row, &source) in order.iter().take(n_keep).enumerate() {
            let vector = v_t.row(source);
            let (_, pivot) = vector.iamax_full();
            let orient = if vector[pivot] < 0.0 { 1.0 } else { -1.0 };
            components.set_row(row, &(vector * orient));
        }

        Ok(Projection {
            mean,
            components,
            explained_variance_ratio: ratios[..n_keep].to_vec(),
        })
    }

    /// Project `features` (trials x n_features) onto the retained components
    pub fn transform(&self, features: &DMatrix<f64>) -> Result<DMatrix<f64>, FeatureError> {
        if features.ncols() != self.n_features() {
            return Err(FeatureError::ShapeMismatch(format!(
                "projection expects {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }
        if self.mean.len() != self.n_features() {
            return Err(FeatureError::ShapeMismatch(format!(
                "projection mean has {} entries for {} features",
                self.mean.len(),
                self.n_features()
            )));
        }
        Ok(center(features, &self.mean) * self.components.transpose())
    }

    /// Number of retained components
    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// Input width the projection was fit on
    pub fn n_features(&self) -> usize {
        self.components.ncols()
    }

    /// Retained components, one per row
    pub fn components(&self) -> &DMatrix<f64> {
        &self.components
    }

    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }
}

fn center(features: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let mut centered = features.clone();
    for (j, mut column) in centered.column_iter_mut().enumerate() {
        column.add_scalar_mut(-mean[j]);
    }
    centered
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points spread along (1, 1) with small noise along (1, -1)
    fn elongated() -> DMatrix<f64> {
        let rows: Vec<f64> = (0..20)
            .flat_map(|i| {
                let t = i as f64 - 9.5;
                let wobble = if i % 2 == 0 { 0.05 } else { -0.05 };
                vec![t + wobble + 3.0, t - wobble - 1.0]
            })
            .collect();
        DMatrix::from_row_slice(20, 2, &rows)
    }

    #[test]
    fn test_projection_keeps_dominant_direction() {
        let projection = Projection::fit(&elongated(), 0.95).unwrap();
        assert_eq!(projection.n_components(), 1);
        assert_eq!(projection.n_features(), 2);
        assert!(projection.explained_variance_ratio()[0] > 0.99);

        let component = projection.components().row(0);
        let inv_sqrt2 = 1.0 / 2f64.sqrt();
        // Largest entry oriented positive, then inverted
        assert!((component[0].abs() - inv_sqrt2).abs() < 1e-3);
        assert!(component.iter().all(|&v| v < 0.0));
    }

    #[test]
    fn test_projection_full_variance_keeps_all() {
        let projection = Projection::fit(&elongated(), 1.0).unwrap();
        assert_eq!(projection.n_components(), 2);
    }

    #[test]
    fn test_projection_is_deterministic() {
        let a = Projection::fit(&elongated(), 0.95).unwrap();
        let b = Projection::fit(&elongated(), 0.95).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_transform_centers_on_training_mean() {
        let train = elongated();
        let projection = Projection::fit(&train, 0.95).unwrap();

        let projected = projection.transform(&train).unwrap();
        assert_eq!(projected.shape(), (20, 1));
        assert!(projected.column(0).mean().abs() < 1e-9);

        let wrong_width = DMatrix::zeros(3, 5);
        assert!(projection.transform(&wrong_width).is_err());
    }

    #[test]
    fn test_mismatched_mean_is_a_shape_error() {
        let mut projection = Projection::fit(&elongated(), 0.95).unwrap();
        projection.mean = DVector::zeros(1);
        assert!(matches!(
            projection.transform(&elongated()),
            Err(FeatureError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_zero_variance_is_rejected() {
        let flat = DMatrix::from_element(5, 3, 2.0);
        assert!(matches!(
            Projection::fit(&flat, 0.95),
            Err(FeatureError::DegenerateFeatures(_))
        ));
    }
}
