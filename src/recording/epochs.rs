// Epoch tensor
// Trials x channels x samples, stored contiguously trial by trial

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::types::Label;

#[derive(Debug, Error)]
pub enum EpochError {
    #[error("Buffer of {actual} values does not match shape {n_trials}x{n_channels}x{n_times}")]
    ShapeMismatch {
        n_trials: usize,
        n_channels: usize,
        n_times: usize,
        actual: usize,
    },

    #[error("Trial {index} out of range for {n_trials} trials")]
    TrialOutOfRange { index: usize, n_trials: usize },

    #[error("Sample range {start}..{end} out of range for {n_times} samples")]
    SampleRangeOutOfRange {
        start: usize,
        end: usize,
        n_times: usize,
    },
}

/// Fixed-shape set of trials, each a (channel x time) matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochTensor {
    data: Vec<f64>,
    n_trials: usize,
    n_channels: usize,
    n_times: usize,
}

impl EpochTensor {
    /// Wrap a flat buffer laid out as `[trial][channel][sample]`
    pub fn new(
        data: Vec<f64>,
        n_trials: usize,
        n_channels: usize,
        n_times: usize,
    ) -> Result<Self, EpochError> {
        if data.len() != n_trials * n_channels * n_times {
            return Err(EpochError::ShapeMismatch {
                n_trials,
                n_channels,
                n_times,
                actual: data.len(),
            });
        }
        Ok(EpochTensor {
            data,
            n_trials,
            n_channels,
            n_times,
        })
    }

    /// Tensor of the given shape filled with zeros
    pub fn zeros(n_trials: usize, n_channels: usize, n_times: usize) -> Self {
        EpochTensor {
            data: vec![0.0; n_trials * n_channels * n_times],
            n_trials,
            n_channels,
            n_times,
        }
    }

    /// Build from nested `trials[trial][channel][sample]` vectors
    pub fn from_trials(trials: &[Vec<Vec<f64>>]) -> Result<Self, EpochError> {
        let n_trials = trials.len();
        let n_channels = trials.first().map(|t| t.len()).unwrap_or(0);
        let n_times = trials
            .first()
            .and_then(|t| t.first())
            .map(|c| c.len())
            .unwrap_or(0);

        let data: Vec<f64> = trials.iter().flatten().flatten().copied().collect();
        Self::new(data, n_trials, n_channels, n_times)
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_times(&self) -> usize {
        self.n_times
    }

    /// `(n_trials, n_channels, n_times)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.n_trials, self.n_channels, self.n_times)
    }

    /// Samples of one trial, channel-major
    pub fn trial(&self, trial: usize) -> &[f64] {
        let len = self.n_channels * self.n_times;
        &self.data[trial * len..(trial + 1) * len]
    }

    /// Samples of one trial-channel
    pub fn channel(&self, trial: usize, channel: usize) -> &[f64] {
        let start = (trial * self.n_channels + channel) * self.n_times;
        &self.data[start..start + self.n_times]
    }

    pub fn channel_mut(&mut self, trial: usize, channel: usize) -> &mut [f64] {
        let start = (trial * self.n_channels + channel) * self.n_times;
        &mut self.data[start..start + self.n_times]
    }

    /// Single sample
    pub fn get(&self, trial: usize, channel: usize, sample: usize) -> f64 {
        self.data[(trial * self.n_channels + channel) * self.n_times + sample]
    }

    /// Copy the listed trials, in the given order, into a new tensor
    pub fn select(&self, indices: &[usize]) -> Result<EpochTensor, EpochError> {
        let mut data = Vec::with_capacity(indices.len() * self.n_channels * self.n_times);
        for &index in indices {
            if index >= self.n_trials {
                return Err(EpochError::TrialOutOfRange {
                    index,
                    n_trials: self.n_trials,
                });
            }
            data.extend_from_slice(self.trial(index));
        }
        Ok(EpochTensor {
            data,
            n_trials: indices.len(),
            n_channels: self.n_channels,
            n_times: self.n_times,
        })
    }

    /// Keep samples `start..end` of every channel
    pub fn crop(&self, start: usize, end: usize) -> Result<EpochTensor, EpochError> {
        if start >= end || end > self.n_times {
            return Err(EpochError::SampleRangeOutOfRange {
                start,
                end,
                n_times: self.n_times,
            });
        }

        let n_times = end - start;
        let mut data = Vec::with_capacity(self.n_trials * self.n_channels * n_times);
        for trial in 0..self.n_trials {
            for channel in 0..self.n_channels {
                data.extend_from_slice(&self.channel(trial, channel)[start..end]);
            }
        }
        Ok(EpochTensor {
            data,
            n_trials: self.n_trials,
            n_channels: self.n_channels,
            n_times,
        })
    }

    /// Keep every `factor`-th sample, starting with the first
    pub fn decimate(&self, factor: usize) -> EpochTensor {
        let factor = factor.max(1);
        let n_times = self.n_times.div_ceil(factor);
        let mut data = Vec::with_capacity(self.n_trials * self.n_channels * n_times);
        for trial in 0..self.n_trials {
            for channel in 0..self.n_channels {
                data.extend(self.channel(trial, channel).iter().step_by(factor).copied());
            }
        }
        EpochTensor {
            data,
            n_trials: self.n_trials,
            n_channels: self.n_channels,
            n_times,
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// Epoched, labeled data ready for feature extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epochs {
    /// Signal trimmed to the padded window `[tlow, thigh]`
    pub data: EpochTensor,

    /// One label per trial
    pub labels: Vec<Label>,

    /// Onset sample of each trial in the source recording
    pub onsets: Vec<usize>,

    /// Names of the picked channels, in tensor order
    pub ch_names: Vec<String>,

    /// Sampling rate in Hz
    pub sfreq: f64,
}

impl Epochs {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of trials carrying `label`
    pub fn count(&self, label: Label) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}
