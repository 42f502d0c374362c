// Recording module
// Continuous signal and trigger types, band-pass filters, and epoch extraction

pub mod epochs;
pub mod filters;
pub mod preprocess;
pub mod types;

pub use epochs::{EpochError, EpochTensor, Epochs};
pub use filters::{CausalBandpass, FilterError, FilterMethod, FirBandpass};
pub use preprocess::{PreprocessError, PreprocessParams, SignalPreprocessor};
pub use types::{EventCodes, Label, Recording, RecordingError, TriggerEvent};
