// Signal preprocessing
// Spatial referencing, optional causal filtering, epoching and baselining

use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::{EpochWindows, TrainerConfig};
use crate::recording::epochs::{EpochError, EpochTensor, Epochs};
use crate::recording::filters::{CausalBandpass, FilterError, FilterMethod};
use crate::recording::types::{EventCodes, Label, Recording, RecordingError};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Invalid recording: {0}")]
    Recording(#[from] RecordingError),

    #[error("Event codes {missing:?} not found in event stream (present: {present:?})")]
    MissingEventCodes { missing: Vec<i32>, present: Vec<i32> },

    #[error("Channel {channel} out of range for {n_channels} channels")]
    ChannelOutOfRange { channel: usize, n_channels: usize },

    #[error("Invalid epoch window: {0}")]
    InvalidWindow(String),

    #[error("No epoch fits inside the recording bounds")]
    NoValidEpochs,

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Epoch error: {0}")]
    Epoch(#[from] EpochError),
}

/// Convert an onset-relative time to a sample offset
/// The small epsilon keeps values like 0.29 * 100 from rounding down
pub fn time_to_offset(t: f64, sfreq: f64) -> i64 {
    (t * sfreq + 1e-9).floor() as i64
}

/// Parameters of the preprocessing stage
#[derive(Debug, Clone)]
pub struct PreprocessParams {
    pub apply_car: bool,
    pub picks: Vec<usize>,
    pub filter_method: FilterMethod,
    pub l_freq: f64,
    pub h_freq: f64,
    pub baseline: Option<(f64, f64)>,
    pub event_codes: EventCodes,
}

impl PreprocessParams {
    /// Preprocessing subset of a trainer configuration
    pub fn from_config(config: &TrainerConfig) -> Self {
        PreprocessParams {
            apply_car: config.apply_car,
            picks: config.picks.clone(),
            filter_method: config.filter_method,
            l_freq: config.l_freq,
            h_freq: config.h_freq,
            baseline: config.baseline,
            event_codes: config.event_codes,
        }
    }
}

/// Turns a continuous recording into labeled epochs over the padded window
pub struct SignalPreprocessor {
    params: PreprocessParams,
}

impl SignalPreprocessor {
    pub fn new(params: PreprocessParams) -> Self {
        SignalPreprocessor { params }
    }

    /// Preprocessor configured from a trainer configuration
    pub fn from_config(config: &TrainerConfig) -> Self {
        Self::new(PreprocessParams::from_config(config))
    }

    pub fn params(&self) -> &PreprocessParams {
        &self.params
    }

    /// Epoch `recording` over `[windows.tlow, windows.thigh]`
    ///
    /// Steps:
    /// 1. Check both feedback codes occur in the event stream
    /// 2. Common average reference (all channels but the trigger channel)
    /// 3. Causal band-pass over the continuous signal, if configured
    /// 4. Cut one epoch per feedback event, dropping out-of-bounds ones
    /// 5. Baseline correction, if configured
    pub fn run(
        &self,
        recording: &Recording,
        windows: &EpochWindows,
    ) -> Result<Epochs, PreprocessError> {
        recording.validate()?;

        let n_channels = recording.n_channels();
        if let Some(&channel) = self.params.picks.iter().find(|&&c| c >= n_channels) {
            return Err(PreprocessError::ChannelOutOfRange {
                channel,
                n_channels,
            });
        }

        self.check_event_codes(recording)?;

        let sfreq = recording.sfreq;
        let start_offset = time_to_offset(windows.tlow, sfreq);
        let end_offset = time_to_offset(windows.thigh, sfreq);
        if end_offset <= start_offset {
            return Err(PreprocessError::InvalidWindow(format!(
                "[{}, {}] s spans no samples at {} Hz",
                windows.tlow, windows.thigh, sfreq
            )));
        }
        let n_times = (end_offset - start_offset) as usize;

        let signal = self.reference_and_filter(recording)?;

        let n_samples = recording.n_samples() as i64;
        let n_picks = self.params.picks.len();
        let mut data = Vec::new();
        let mut labels = Vec::new();
        let mut onsets = Vec::new();
        let mut dropped = 0usize;

        for event in recording.events.iter() {
            let label = match self.params.event_codes.label_for(event.code) {
                Some(label) => label,
                None => continue,
            };

            let start = event.sample as i64 + start_offset;
            let end = event.sample as i64 + end_offset;
            if start < 0 || end > n_samples {
                dropped += 1;
                continue;
            }

            let (start, end) = (start as usize, end as usize);
            for &channel in self.params.picks.iter() {
                data.extend_from_slice(&signal[channel][start..end]);
            }
            labels.push(label);
            onsets.push(event.sample);
        }

        if dropped > 0 {
            log::warn!("Dropped {} epochs exceeding recording bounds", dropped);
        }
        if labels.is_empty() {
            return Err(PreprocessError::NoValidEpochs);
        }

        let mut tensor = EpochTensor::new(data, labels.len(), n_picks, n_times)?;
        if let Some(baseline) = self.params.baseline {
            apply_baseline(&mut tensor, baseline, start_offset, sfreq)?;
        }

        let epochs = Epochs {
            data: tensor,
            labels,
            onsets,
            ch_names: self
                .params
                .picks
                .iter()
                .map(|&c| recording.ch_names[c].clone())
                .collect(),
            sfreq,
        };

        log::info!(
            "Epoched {} trials ({} positive, {} negative), {} channels x {} samples",
            epochs.len(),
            epochs.count(Label::Positive),
            epochs.count(Label::Negative),
            n_picks,
            n_times
        );

        Ok(epochs)
    }

    fn check_event_codes(&self, recording: &Recording) -> Result<(), PreprocessError> {
        let present: BTreeSet<i32> = recording.events.iter().map(|e| e.code).collect();
        let codes = self.params.event_codes;
        let missing: Vec<i32> = [codes.positive, codes.negative]
            .into_iter()
            .filter(|code| !present.contains(code))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PreprocessError::MissingEventCodes {
                missing,
                present: present.into_iter().collect(),
            })
        }
    }

    /// Copy of the continuous signal with CAR and causal filtering applied
    fn reference_and_filter(&self, recording: &Recording) -> Result<Vec<Vec<f64>>, PreprocessError> {
        let mut signal = recording.data.clone();

        if self.params.apply_car {
            let referenced: Vec<usize> = (0..recording.n_channels())
                .filter(|&c| Some(c) != recording.trigger_channel)
                .collect();

            if !referenced.is_empty() {
                let count = referenced.len() as f64;
                for sample in 0..recording.n_samples() {
                    let mean = referenced.iter().map(|&c| signal[c][sample]).sum::<f64>() / count;
                    for &c in referenced.iter() {
                        signal[c][sample] -= mean;
                    }
                }
            }
        }

        if self.params.filter_method == FilterMethod::Causal {
            for &channel in self.params.picks.iter() {
                let mut filter =
                    CausalBandpass::new(recording.sfreq, self.params.l_freq, self.params.h_freq)?;
                filter.process(&mut signal[channel]);
            }
        }

        Ok(signal)
    }
}

/// Subtract each trial-channel's mean over the baseline interval
fn apply_baseline(
    tensor: &mut EpochTensor,
    (b0, b1): (f64, f64),
    start_offset: i64,
    sfreq: f64,
) -> Result<(), PreprocessError> {
    let from = time_to_offset(b0, sfreq) - start_offset;
    let to = time_to_offset(b1, sfreq) - start_offset;
    if from < 0 || to > tensor.n_times() as i64 || from >= to {
        return Err(PreprocessError::InvalidWindow(format!(
            "baseline [{}, {}] s lies outside the epoch",
            b0, b1
        )));
    }

    let (from, to) = (from as usize, to as usize);
    for trial in 0..tensor.n_trials() {
        for channel in 0..tensor.n_channels() {
            let samples = tensor.channel_mut(trial, channel);
            let mean = samples[from..to].iter().sum::<f64>() / (to - from) as f64;
            for value in samples.iter_mut() {
                *value -= mean;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::types::TriggerEvent;

    fn params(picks: Vec<usize>) -> PreprocessParams {
        PreprocessParams {
            apply_car: false,
            picks,
            filter_method: FilterMethod::Windowed,
            l_freq: 2.0,
            h_freq: 10.0,
            baseline: None,
            event_codes: EventCodes::default(),
        }
    }

    /// Channel c carries value c*1000 + sample index
    fn make_recording(events: Vec<TriggerEvent>) -> Recording {
        let data = (0..3)
            .map(|c| (0..200).map(|s| (c * 1000 + s) as f64).collect())
            .collect();
        Recording::new(
            data,
            vec!["TRIG".to_string(), "Fz".to_string(), "Cz".to_string()],
            100.0,
            events,
        )
        .unwrap()
        .with_trigger_channel(0)
    }

    fn windows() -> EpochWindows {
        EpochWindows::with_padding(0.2, 0.5, 0.1)
    }

    #[test]
    fn test_epochs_cut_padded_window() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 50, code: 4 },
            TriggerEvent { sample: 60, code: 7 },
        ]);
        let epochs = SignalPreprocessor::new(params(vec![1, 2]))
            .run(&recording, &windows())
            .unwrap();

        // tlow = 0.1 s -> +10 samples, thigh = 0.6 s -> +60 samples
        assert_eq!(epochs.data.shape(), (2, 2, 50));
        assert_eq!(epochs.labels, vec![Label::Positive, Label::Negative]);
        assert_eq!(epochs.onsets, vec![20, 50]);
        assert_eq!(epochs.data.get(0, 0, 0), 1030.0);
        assert_eq!(epochs.data.get(1, 1, 49), 2109.0);
        assert_eq!(epochs.ch_names, vec!["Fz".to_string(), "Cz".to_string()]);
    }

    #[test]
    fn test_out_of_bounds_epochs_are_dropped() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 150, code: 4 },
            TriggerEvent { sample: 100, code: 4 },
        ]);
        let epochs = SignalPreprocessor::new(params(vec![1]))
            .run(&recording, &windows())
            .unwrap();

        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs.onsets, vec![20, 100]);
    }

    #[test]
    fn test_all_epochs_out_of_bounds_is_an_error() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 190, code: 3 },
            TriggerEvent { sample: 195, code: 4 },
        ]);
        let result = SignalPreprocessor::new(params(vec![1])).run(&recording, &windows());
        assert!(matches!(result, Err(PreprocessError::NoValidEpochs)));
    }

    #[test]
    fn test_missing_event_codes() {
        let recording = make_recording(vec![TriggerEvent { sample: 20, code: 3 }]);
        let result = SignalPreprocessor::new(params(vec![1])).run(&recording, &windows());
        match result {
            Err(PreprocessError::MissingEventCodes { missing, present }) => {
                assert_eq!(missing, vec![4]);
                assert_eq!(present, vec![3]);
            }
            other => panic!("unexpected result: {:?}", other.map(|e| e.len())),
        }
    }

    #[test]
    fn test_pick_out_of_range() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 50, code: 4 },
        ]);
        let result = SignalPreprocessor::new(params(vec![5])).run(&recording, &windows());
        assert!(matches!(
            result,
            Err(PreprocessError::ChannelOutOfRange { channel: 5, .. })
        ));
    }

    #[test]
    fn test_car_excludes_trigger_channel() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 50, code: 4 },
        ]);
        let mut p = params(vec![0, 1, 2]);
        p.apply_car = true;
        let epochs = SignalPreprocessor::new(p).run(&recording, &windows()).unwrap();

        // Channels 1 and 2 differ by 1000, so after CAR they sit at -500 / +500
        assert_eq!(epochs.data.get(0, 1, 0), -500.0);
        assert_eq!(epochs.data.get(0, 2, 0), 500.0);
        // Trigger channel untouched
        assert_eq!(epochs.data.get(0, 0, 0), 30.0);
    }

    #[test]
    fn test_baseline_correction() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 50, code: 4 },
        ]);
        let mut p = params(vec![1]);
        p.baseline = Some((0.1, 0.2));
        let epochs = SignalPreprocessor::new(p).run(&recording, &windows()).unwrap();

        // Baseline covers epoch samples 0..10 whose mean is first + 4.5
        assert!((epochs.data.get(0, 0, 0) + 4.5).abs() < 1e-9);
        assert!((epochs.data.get(0, 0, 49) - 44.5).abs() < 1e-9);

        let mut p = params(vec![1]);
        p.baseline = Some((-1.0, 0.2));
        let result = SignalPreprocessor::new(p).run(&recording, &windows());
        assert!(matches!(result, Err(PreprocessError::InvalidWindow(_))));
    }

    #[test]
    fn test_causal_filtering_changes_signal() {
        let recording = make_recording(vec![
            TriggerEvent { sample: 40, code: 3 },
            TriggerEvent { sample: 80, code: 4 },
        ]);
        let mut p = params(vec![1]);
        p.filter_method = FilterMethod::Causal;
        let filtered = SignalPreprocessor::new(p).run(&recording, &windows()).unwrap();
        let raw = SignalPreprocessor::new(params(vec![1]))
            .run(&recording, &windows())
            .unwrap();

        assert_eq!(filtered.data.shape(), raw.data.shape());
        assert_ne!(filtered.data, raw.data);
    }

    #[test]
    fn test_ragged_recording_is_an_error() {
        let mut recording = make_recording(vec![
            TriggerEvent { sample: 20, code: 3 },
            TriggerEvent { sample: 50, code: 4 },
        ]);
        recording.data[2].truncate(3);
        let mut p = params(vec![1, 2]);
        p.apply_car = true;

        let result = SignalPreprocessor::new(p).run(&recording, &windows());
        assert!(matches!(
            result,
            Err(PreprocessError::Recording(RecordingError::RaggedChannels {
                channel: 2,
                ..
            }))
        ));

        let json = serde_json::to_string(&recording).unwrap();
        assert!(serde_json::from_str::<Recording>(&json).is_err());
    }

    #[test]
    fn test_time_to_offset() {
        assert_eq!(time_to_offset(0.29, 100.0), 29);
        assert_eq!(time_to_offset(0.2, 512.0), 102);
        assert_eq!(time_to_offset(-0.1, 100.0), -10);
    }
}
