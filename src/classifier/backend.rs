// Classifier capability interface
// Any binary classifier the trainer can cross-validate, calibrate and export

use nalgebra::DMatrix;
use thiserror::Error;

use crate::recording::Label;

/// Errors that can occur during fitting or prediction
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier used before fit")]
    NotFitted,

    #[error("{features} feature rows but {labels} labels")]
    LabelCountMismatch { features: usize, labels: usize },

    #[error("Training data contains only {0:?} samples")]
    SingleClass(Label),

    #[error("Expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Regularization coefficient must lie in [0, 1], got {0}")]
    InvalidRegularization(f64),

    #[error("Numerical failure: {0}")]
    Numerical(String),
}

/// Binary classifier over feature rows (trials x features)
///
/// Probability pairs are ordered like [`Label::ALL`]: `[p(positive), p(negative)]`.
pub trait Classifier {
    /// Fit on training features and their labels
    fn fit(&mut self, features: &DMatrix<f64>, labels: &[Label]) -> Result<(), ClassifierError>;

    /// Hard decision per row
    fn predict(&self, features: &DMatrix<f64>) -> Result<Vec<Label>, ClassifierError>;

    /// Class probabilities per row
    fn predict_proba(&self, features: &DMatrix<f64>) -> Result<Vec<[f64; 2]>, ClassifierError>;
}

/// Validate training inputs and return the row indices of each class
pub fn split_by_label(
    features: &DMatrix<f64>,
    labels: &[Label],
) -> Result<[Vec<usize>; 2], ClassifierError> {
    if features.nrows() != labels.len() {
        return Err(ClassifierError::LabelCountMismatch {
            features: features.nrows(),
            labels: labels.len(),
        });
    }

    let mut rows: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, label) in labels.iter().enumerate() {
        rows[label.index()].push(i);
    }

    for label in Label::ALL {
        if rows[label.index()].is_empty() {
            let present = Label::ALL[1 - label.index()];
            return Err(ClassifierError::SingleClass(present));
        }
    }
    Ok(rows)
}
