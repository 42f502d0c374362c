// Feature extraction
// Turns padded epochs into low-dimensional feature vectors with a fit/apply
// split so test partitions only ever see statistics of their training partition

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{EpochWindows, TrainerConfig};
use crate::features::projection::Projection;
use crate::recording::preprocess::time_to_offset;
use crate::recording::{EpochError, EpochTensor, FilterError, FilterMethod, FirBandpass};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Apply mode requires the fit state of the paired training partition")]
    MissingFitState,

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Feature window [{tmin}, {tmax}] s does not fit the {n_times}-sample padded epoch")]
    WindowOutOfRange { tmin: f64, tmax: f64, n_times: usize },

    #[error("No trials to extract features from")]
    EmptyEpochs,

    #[error("Degenerate features: {0}")]
    DegenerateFeatures(String),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Epoch error: {0}")]
    Epoch(#[from] EpochError),
}

/// Whether statistics are learned from the data or taken from a prior fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Fit,
    Apply,
}

/// Min-max normalization factors, one per (channel, sample) position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub n_channels: usize,
    pub n_times: usize,

    /// Maximum over training trials, channel-major
    pub shift: Vec<f64>,

    /// Range (max - min) over training trials, channel-major
    pub scale: Vec<f64>,
}

impl Normalization {
    fn fit(epochs: &EpochTensor) -> Self {
        let width = epochs.n_channels() * epochs.n_times();
        let mut max = vec![f64::NEG_INFINITY; width];
        let mut min = vec![f64::INFINITY; width];

        for trial in 0..epochs.n_trials() {
            for (i, &value) in epochs.trial(trial).iter().enumerate() {
                max[i] = max[i].max(value);
                min[i] = min[i].min(value);
            }
        }

        let scale = max.iter().zip(min.iter()).map(|(hi, lo)| hi - lo).collect();
        Normalization {
            n_channels: epochs.n_channels(),
            n_times: epochs.n_times(),
            shift: max,
            scale,
        }
    }

    /// `(x - shift) / scale`; positions with zero scale map to 0.0
    fn apply(&self, epochs: &EpochTensor) -> Result<EpochTensor, FeatureError> {
        if epochs.n_channels() != self.n_channels || epochs.n_times() != self.n_times {
            return Err(FeatureError::ShapeMismatch(format!(
                "normalization fit on {}x{}, data is {}x{}",
                self.n_channels,
                self.n_times,
                epochs.n_channels(),
                epochs.n_times()
            )));
        }
        let width = self.n_channels * self.n_times;
        if self.shift.len() != width || self.scale.len() != width {
            return Err(FeatureError::ShapeMismatch(format!(
                "normalization has {} shift and {} scale factors for {} positions",
                self.shift.len(),
                self.scale.len(),
                width
            )));
        }

        let mut data = Vec::with_capacity(epochs.as_slice().len());
        for trial in 0..epochs.n_trials() {
            for (i, &value) in epochs.trial(trial).iter().enumerate() {
                let scale = self.scale[i];
                data.push(if scale == 0.0 {
                    0.0
                } else {
                    (value - self.shift[i]) / scale
                });
            }
        }
        Ok(EpochTensor::new(
            data,
            epochs.n_trials(),
            epochs.n_channels(),
            epochs.n_times(),
        )?)
    }
}

/// Everything learned from a training partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    pub normalization: Normalization,

    /// `None` when the projection is disabled
    pub projection: Option<Projection>,
}

/// Fixed parameters of the feature pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    pub sfreq: f64,
    pub windows: EpochWindows,
    pub filter_method: FilterMethod,
    pub l_freq: f64,
    pub h_freq: f64,
    pub decimation: usize,
    pub apply_pca: bool,
    pub explained_variance: f64,
}

impl FeatureParams {
    /// Feature parameters for one padding value
    pub fn from_config(config: &TrainerConfig, windows: EpochWindows, sfreq: f64) -> Self {
        FeatureParams {
            sfreq,
            windows,
            filter_method: config.filter_method,
            l_freq: config.l_freq,
            h_freq: config.h_freq,
            decimation: config.decimation,
            apply_pca: config.apply_pca,
            explained_variance: config.explained_variance,
        }
    }

    /// Sample range of the feature window inside the padded epoch
    pub fn crop_range(&self) -> (usize, usize) {
        let w = &self.windows;
        let before = (self.sfreq * (w.tmin - w.tlow)).round().max(0.0) as usize;
        let duration = (time_to_offset(w.tmax, self.sfreq) - time_to_offset(w.tmin, self.sfreq))
            .max(0) as usize;
        (before, before + duration)
    }
}

/// Feature pipeline: filter, crop, DC removal, normalization, decimation,
/// flattening and projection, always in that order
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    params: FeatureParams,
}

impl FeatureExtractor {
    /// Pipeline over fixed parameters
    pub fn new(params: FeatureParams) -> Self {
        FeatureExtractor { params }
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    /// Run the pipeline on padded epochs
    ///
    /// In `Fit` mode normalization factors and the projection are learned
    /// from `epochs` and returned. In `Apply` mode `fit_state` must come from
    /// a `Fit` call on the paired training partition; it is returned as is.
    pub fn extract(
        &self,
        epochs: &EpochTensor,
        mode: ExtractMode,
        fit_state: Option<&FitState>,
    ) -> Result<(DMatrix<f64>, FitState), FeatureError> {
        if epochs.n_trials() == 0 {
            return Err(FeatureError::EmptyEpochs);
        }
        if mode == ExtractMode::Apply && fit_state.is_none() {
            return Err(FeatureError::MissingFitState);
        }

        let filtered = self.band_pass(epochs)?;
        let cropped = self.crop(&filtered)?;
        let centered = remove_dc(cropped);

        let normalization = match (mode, fit_state) {
            (ExtractMode::Apply, Some(state)) => state.normalization.clone(),
            _ => Normalization::fit(&centered),
        };
        let normalized = normalization.apply(&centered)?;

        let decimated = normalized.decimate(self.params.decimation);
        let flat = flatten(decimated);

        match (mode, fit_state) {
            (ExtractMode::Apply, Some(state)) => {
                let features = match &state.projection {
                    Some(projection) => projection.transform(&flat)?,
                    None => flat,
                };
                Ok((features, state.clone()))
            }
            _ => {
                let projection = if self.params.apply_pca {
                    Some(Projection::fit(&flat, self.params.explained_variance)?)
                } else {
                    None
                };
                let features = match &projection {
                    Some(projection) => projection.transform(&flat)?,
                    None => flat,
                };
                Ok((
                    features,
                    FitState {
                        normalization,
                        projection,
                    },
                ))
            }
        }
    }

    /// Fit on a training partition
    pub fn fit_transform(&self, epochs: &EpochTensor) -> Result<(DMatrix<f64>, FitState), FeatureError> {
        self.extract(epochs, ExtractMode::Fit, None)
    }

    /// Apply a training fit to another partition
    pub fn transform(&self, epochs: &EpochTensor, state: &FitState) -> Result<DMatrix<f64>, FeatureError> {
        self.extract(epochs, ExtractMode::Apply, Some(state))
            .map(|(features, _)| features)
    }

    fn band_pass(&self, epochs: &EpochTensor) -> Result<EpochTensor, FeatureError> {
        let mut filtered = epochs.clone();
        if !self.params.filter_method.filters_epochs() {
            return Ok(filtered);
        }

        let convolver = FirBandpass::design(self.params.sfreq, self.params.l_freq, self.params.h_freq)?
            .convolver(epochs.n_times())?;
        for trial in 0..filtered.n_trials() {
            for channel in 0..filtered.n_channels() {
                convolver.apply(filtered.channel_mut(trial, channel))?;
            }
        }
        Ok(filtered)
    }

    fn crop(&self, epochs: &EpochTensor) -> Result<EpochTensor, FeatureError> {
        let (start, end) = self.params.crop_range();
        if start >= end || end > epochs.n_times() {
            return Err(FeatureError::WindowOutOfRange {
                tmin: self.params.windows.tmin,
                tmax: self.params.windows.tmax,
                n_times: epochs.n_times(),
            });
        }
        Ok(epochs.crop(start, end)?)
    }
}

/// Subtract each trial-channel's mean over time
fn remove_dc(mut epochs: EpochTensor) -> EpochTensor {
    for trial in 0..epochs.n_trials() {
        for channel in 0..epochs.n_channels() {
            let samples = epochs.channel_mut(trial, channel);
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            for value in samples.iter_mut() {
                *value -= mean;
            }
        }
    }
    epochs
}

/// One row per trial, channel-major feature order
fn flatten(epochs: EpochTensor) -> DMatrix<f64> {
    let (n_trials, n_channels, n_times) = epochs.shape();
    DMatrix::from_row_slice(n_trials, n_channels * n_times, epochs.as_slice())
}
