// ErrP Trainer - offline error-related potential classifier training
// Module declarations and public surface

pub mod bundle;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod features;
pub mod recording;
pub mod search;
pub mod validation;

pub use bundle::{BundleError, BundleWriter, ClassifierBundle, Decision};
pub use calibration::{Calibration, CalibrationError, OperatingPoint, ThresholdCalibrator};
pub use classifier::{Classifier, ClassifierError, Rlda};
pub use config::{ConfigError, EpochWindows, ExportCriterion, SearchGrid, TrainerConfig};
pub use features::{ExtractMode, FeatureError, FeatureExtractor, FeatureParams, FitState};
pub use recording::{
    EpochTensor, Epochs, EventCodes, FilterMethod, Label, PreprocessError, Recording,
    SignalPreprocessor, TriggerEvent,
};
pub use search::{CellResult, HyperparameterSearch, SearchError, SearchOutcome, TraceWriter};
pub use validation::{
    ConfusionMatrix, CrossValidationEngine, CvOutcome, FoldCache, FoldStrategy, NormalizedConfusion,
    ValidationError,
};
