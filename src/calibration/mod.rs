// Calibration module
// ROC sweep, AUC and constrained operating-point selection

pub mod threshold;

pub use threshold::{
    threshold_grid, Calibration, CalibrationError, OperatingPoint, ThresholdCalibrator, N_THRESHOLDS,
};
