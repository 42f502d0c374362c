// Validation module
// Fold generation, confusion matrices and the cross-validation engine

pub mod confusion;
pub mod engine;
pub mod folds;

pub use confusion::{ConfusionMatrix, NormalizedConfusion};
pub use engine::{CrossValidationEngine, CvOutcome, FoldCache, FoldFeatures, ValidationError};
pub use folds::{Fold, FoldError, FoldStrategy};
