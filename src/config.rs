// Trainer configuration
// Epoch windows, preprocessing options, evaluation policy and the search grid

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::{EventCodes, FilterMethod};
use crate::validation::FoldStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Feature window [{tmin}, {tmax}] is empty")]
    InvalidWindow { tmin: f64, tmax: f64 },

    #[error("Invalid filter band [{l_freq}, {h_freq}] Hz")]
    InvalidBand { l_freq: f64, h_freq: f64 },

    #[error("Decimation factor must be at least 1")]
    InvalidDecimation,

    #[error("Maximum false-positive rate must lie in [0, 1], got {0}")]
    InvalidMaxFpr(f64),

    #[error("Explained variance target must lie in (0, 1], got {0}")]
    InvalidExplainedVariance(f64),

    #[error("Baseline range [{0}, {1}] is empty")]
    InvalidBaseline(f64, f64),

    #[error("No channels picked")]
    EmptyPicks,

    #[error("Search grid has no {0} values")]
    EmptyGrid(&'static str),

    #[error("Padding must be non-negative, got {0}")]
    NegativePadding(f64),

    #[error("Regularization coefficient must lie in [0, 1], got {0}")]
    InvalidRegCoeff(f64),

    #[error("Invalid fold strategy: {0}")]
    InvalidFolds(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Onset-relative time windows, in seconds
///
/// ```text
///            tlow    tmin     tmax    thigh
/// ---onset----|-------|--------|-------|----
///                     <-------->
///                   feature window
///             <------------------------>
///                  padded window
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochWindows {
    pub tmin: f64,
    pub tmax: f64,
    pub tlow: f64,
    pub thigh: f64,
}

impl EpochWindows {
    /// Widen the feature window by `padding` seconds on both sides
    pub fn with_padding(tmin: f64, tmax: f64, padding: f64) -> Self {
        EpochWindows {
            tmin,
            tmax,
            tlow: tmin - padding,
            thigh: tmax + padding,
        }
    }
}

/// Which search winner gets refit and exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCriterion {
    BestAuc,
    BestTpr,
}

/// Hyperparameter grid: temporal padding (rows) x regularization (columns)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchGrid {
    /// Padding in seconds added around the feature window
    pub paddings: Vec<f64>,

    /// Covariance shrinkage coefficients for the classifier
    pub reg_coeffs: Vec<f64>,
}

impl Default for SearchGrid {
    fn default() -> Self {
        SearchGrid {
            paddings: vec![0.0, 0.1, 0.2],
            reg_coeffs: (0..10).map(|i| i as f64 * 0.1).collect(),
        }
    }
}

/// Complete, immutable configuration of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Feature window start, seconds after onset
    pub tmin: f64,

    /// Feature window end, seconds after onset
    pub tmax: f64,

    /// Band-pass low edge (Hz)
    pub l_freq: f64,

    /// Band-pass high edge (Hz)
    pub h_freq: f64,

    /// Keep every Nth sample of the feature window
    pub decimation: usize,

    /// Common average reference before epoching
    pub apply_car: bool,

    /// Variance-retaining projection after flattening
    pub apply_pca: bool,

    /// Fraction of variance the projection must retain
    pub explained_variance: f64,

    /// Optional onset-relative baseline interval (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<(f64, f64)>,

    pub filter_method: FilterMethod,

    /// Operating points must have FPR strictly below this
    pub max_fpr: f64,

    /// Channel indices into the recording used as features
    pub picks: Vec<usize>,

    pub fold_strategy: FoldStrategy,

    pub event_codes: EventCodes,

    pub grid: SearchGrid,

    pub export: ExportCriterion,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            tmin: 0.2,
            tmax: 0.8,
            l_freq: 2.0,
            h_freq: 10.0,
            decimation: 4,
            apply_car: false,
            apply_pca: true,
            explained_variance: 0.95,
            baseline: None,
            filter_method: FilterMethod::Windowed,
            max_fpr: 0.15,
            picks: vec![1, 3, 4, 5, 8, 9, 10, 14],
            fold_strategy: FoldStrategy::default(),
            event_codes: EventCodes::default(),
            grid: SearchGrid::default(),
            export: ExportCriterion::BestAuc,
        }
    }
}

impl TrainerConfig {
    /// Windows for one padding value of the grid
    pub fn windows(&self, padding: f64) -> EpochWindows {
        EpochWindows::with_padding(self.tmin, self.tmax, padding)
    }

    /// Reject configurations that cannot produce a valid pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tmin < self.tmax) {
            return Err(ConfigError::InvalidWindow {
                tmin: self.tmin,
                tmax: self.tmax,
            });
        }
        if !(self.l_freq > 0.0 && self.l_freq < self.h_freq) {
            return Err(ConfigError::InvalidBand {
                l_freq: self.l_freq,
                h_freq: self.h_freq,
            });
        }
        if self.decimation == 0 {
            return Err(ConfigError::InvalidDecimation);
        }
        if !(0.0..=1.0).contains(&self.max_fpr) {
            return Err(ConfigError::InvalidMaxFpr(self.max_fpr));
        }
        if !(self.explained_variance > 0.0 && self.explained_variance <= 1.0) {
            return Err(ConfigError::InvalidExplainedVariance(self.explained_variance));
        }
        if let Some((b0, b1)) = self.baseline {
            if !(b0 < b1) {
                return Err(ConfigError::InvalidBaseline(b0, b1));
            }
        }
        if self.picks.is_empty() {
            return Err(ConfigError::EmptyPicks);
        }
        if self.grid.paddings.is_empty() {
            return Err(ConfigError::EmptyGrid("padding"));
        }
        if self.grid.reg_coeffs.is_empty() {
            return Err(ConfigError::EmptyGrid("regularization"));
        }
        if let Some(&padding) = self.grid.paddings.iter().find(|&&p| !(p >= 0.0)) {
            return Err(ConfigError::NegativePadding(padding));
        }
        if let Some(&reg_coeff) = self
            .grid
            .reg_coeffs
            .iter()
            .find(|&&r| !(0.0..=1.0).contains(&r))
        {
            return Err(ConfigError::InvalidRegCoeff(reg_coeff));
        }
        self.fold_strategy
            .validate()
            .map_err(|e| ConfigError::InvalidFolds(e.to_string()))?;
        Ok(())
    }

    /// Serialize configuration to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize and validate configuration from JSON bytes
    /// Missing fields fall back to the defaults
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ConfigError> {
        let config: TrainerConfig = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }
}
