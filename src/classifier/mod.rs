// Classifier module
// Capability interface plus the regularized LDA family

pub mod backend;
pub mod rlda;

pub use backend::{Classifier, ClassifierError};
pub use rlda::Rlda;
