// Recording types
// Continuous multi-channel signal, trigger stream, and the binary label scheme

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Trigger table key for feedback that the user perceived as an error
pub const TRIGGER_FEEDBACK_WRONG: &str = "FEEDBACK_WRONG";

/// Trigger table key for feedback that matched the user's intent
pub const TRIGGER_FEEDBACK_CORRECT: &str = "FEEDBACK_CORRECT";

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Sampling rate must be positive, got {0}")]
    InvalidSampleRate(f64),

    #[error("Expected {expected} channel names, got {actual}")]
    ChannelNameMismatch { expected: usize, actual: usize },

    #[error("Channel {channel} has {actual} samples, expected {expected}")]
    RaggedChannels {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Recordings do not share the same channel layout and sampling rate")]
    LayoutMismatch,

    #[error("Nothing to concatenate")]
    Empty,
}

/// Binary class of an epoch
/// Ordering is fixed: Positive is index 0, Negative is index 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Error-related potential present ("wrong" feedback)
    Positive,

    /// No deviation ("correct" feedback)
    Negative,
}

impl Label {
    /// Both labels in matrix / probability-column order
    pub const ALL: [Label; 2] = [Label::Positive, Label::Negative];

    /// Row / column index in confusion matrices and probability pairs
    pub fn index(&self) -> usize {
        match self {
            Label::Positive => 0,
            Label::Negative => 1,
        }
    }

    /// Human-readable name for reports
    pub fn display_name(&self) -> &'static str {
        match self {
            Label::Positive => "wrong (ErrP)",
            Label::Negative => "correct",
        }
    }
}

/// Trigger codes that mark the two feedback classes in the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCodes {
    /// Code of "wrong" feedback events
    pub positive: i32,

    /// Code of "correct" feedback events
    pub negative: i32,
}

impl Default for EventCodes {
    fn default() -> Self {
        EventCodes {
            positive: 3,
            negative: 4,
        }
    }
}

impl EventCodes {
    /// Resolve the feedback codes from an external name -> code trigger table
    pub fn from_trigger_table(table: &HashMap<String, i32>) -> Option<Self> {
        Some(EventCodes {
            positive: *table.get(TRIGGER_FEEDBACK_WRONG)?,
            negative: *table.get(TRIGGER_FEEDBACK_CORRECT)?,
        })
    }

    /// Map a trigger code to its label, if it is one of the two feedback codes
    pub fn label_for(&self, code: i32) -> Option<Label> {
        if code == self.positive {
            Some(Label::Positive)
        } else if code == self.negative {
            Some(Label::Negative)
        } else {
            None
        }
    }
}

/// A single trigger in the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Onset as a sample index into the recording
    pub sample: usize,

    /// Raw trigger code
    pub code: i32,
}

/// Continuous multi-channel recording with its trigger stream
/// Deserialization runs the same shape checks as `Recording::new`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RecordingFields")]
pub struct Recording {
    /// Signal per channel: `data[channel][sample]`
    pub data: Vec<Vec<f64>>,

    /// Channel names, same order as `data`
    pub ch_names: Vec<String>,

    /// Sampling rate in Hz
    pub sfreq: f64,

    /// Non-signal (trigger) channel excluded from common average referencing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_channel: Option<usize>,

    /// Trigger events in recording order
    pub events: Vec<TriggerEvent>,
}

/// Unchecked serde image of a `Recording`
#[derive(Deserialize)]
struct RecordingFields {
    data: Vec<Vec<f64>>,
    ch_names: Vec<String>,
    sfreq: f64,
    #[serde(default)]
    trigger_channel: Option<usize>,
    events: Vec<TriggerEvent>,
}

impl TryFrom<RecordingFields> for Recording {
    type Error = RecordingError;

    fn try_from(fields: RecordingFields) -> Result<Self, Self::Error> {
        let recording = Recording {
            data: fields.data,
            ch_names: fields.ch_names,
            sfreq: fields.sfreq,
            trigger_channel: fields.trigger_channel,
            events: fields.events,
        };
        recording.validate()?;
        Ok(recording)
    }
}

impl Recording {
    /// Build a recording, checking that every channel has the same length
    pub fn new(
        data: Vec<Vec<f64>>,
        ch_names: Vec<String>,
        sfreq: f64,
        events: Vec<TriggerEvent>,
    ) -> Result<Self, RecordingError> {
        let recording = Recording {
            data,
            ch_names,
            sfreq,
            trigger_channel: None,
            events,
        };
        recording.validate()?;
        Ok(recording)
    }

    /// Check the sampling rate and that names and channels line up
    /// Fields are public, so consumers re-run this before indexing samples
    pub fn validate(&self) -> Result<(), RecordingError> {
        if !(self.sfreq > 0.0) || !self.sfreq.is_finite() {
            return Err(RecordingError::InvalidSampleRate(self.sfreq));
        }
        if self.ch_names.len() != self.data.len() {
            return Err(RecordingError::ChannelNameMismatch {
                expected: self.data.len(),
                actual: self.ch_names.len(),
            });
        }

        let expected = self.n_samples();
        for (channel, samples) in self.data.iter().enumerate() {
            if samples.len() != expected {
                return Err(RecordingError::RaggedChannels {
                    channel,
                    expected,
                    actual: samples.len(),
                });
            }
        }
        Ok(())
    }

    /// Mark a channel as the non-signal trigger channel
    pub fn with_trigger_channel(mut self, channel: usize) -> Self {
        self.trigger_channel = Some(channel);
        self
    }

    /// Number of channels, trigger channel included
    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    /// Samples per channel
    pub fn n_samples(&self) -> usize {
        self.data.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.n_samples() as f64 / self.sfreq
    }

    /// Join several sessions recorded with the same montage into one recording
    /// Event sample indices of later sessions are shifted by the preceding lengths
    pub fn concatenate(recordings: &[Recording]) -> Result<Recording, RecordingError> {
        let first = recordings.first().ok_or(RecordingError::Empty)?;

        let mut data = vec![Vec::new(); first.n_channels()];
        let mut events = Vec::new();
        let mut offset = 0;

        for rec in recordings {
            if rec.ch_names != first.ch_names
                || rec.sfreq != first.sfreq
                || rec.trigger_channel != first.trigger_channel
            {
                return Err(RecordingError::LayoutMismatch);
            }

            for (joined, samples) in data.iter_mut().zip(rec.data.iter()) {
                joined.extend_from_slice(samples);
            }
            events.extend(rec.events.iter().map(|e| TriggerEvent {
                sample: e.sample + offset,
                code: e.code,
            }));
            offset += rec.n_samples();
        }

        Ok(Recording {
            data,
            ch_names: first.ch_names.clone(),
            sfreq: first.sfreq,
            trigger_channel: first.trigger_channel,
            events,
        })
    }
}
