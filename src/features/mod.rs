// Feature module
// Fit/apply feature pipeline and the variance-retaining projection

pub mod extractor;
pub mod projection;

pub use extractor::{
    ExtractMode, FeatureError, FeatureExtractor, FeatureParams, FitState, Normalization,
};
pub use projection::Projection;
