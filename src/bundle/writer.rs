// Classifier bundle persistence
// The deployable artifact: preprocessing parameters, fitted feature state, classifier and threshold

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::classifier::{Classifier, ClassifierError};
use crate::config::{EpochWindows, TrainerConfig};
use crate::features::{FeatureError, FeatureExtractor, FeatureParams, FitState, Normalization, Projection};
use crate::recording::{EpochTensor, Epochs, EventCodes, FilterMethod, Label, PreprocessParams};

/// Directory created inside the dataset directory
pub const BUNDLE_DIR: &str = "errp_classifier";

/// Bundle file name inside [`BUNDLE_DIR`]
pub const BUNDLE_FILE: &str = "errp_classifier.json";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Feature replay failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Fitted decoder plus everything needed to reproduce its input features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierBundle<C> {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,

    /// Common average reference applied before epoching
    pub apply_car: bool,
    pub sfreq: f64,

    /// Channel indices into the raw recording
    pub picks: Vec<usize>,
    pub ch_names: Vec<String>,
    pub event_codes: EventCodes,

    pub tmin: f64,
    pub tmax: f64,
    pub tlow: f64,
    pub thigh: f64,

    pub l_freq: f64,
    pub h_freq: f64,
    pub filter_method: FilterMethod,
    pub baseline: Option<(f64, f64)>,
    pub decimation: usize,

    /// Samples per padded epoch
    pub wframes: usize,

    /// Min-max factors learned on the full training set
    pub normalization: Normalization,
    pub projection: Option<Projection>,
    pub explained_variance: f64,

    pub classifier: C,

    /// Scores below this are decided positive
    pub threshold: f64,
}

/// Replayed decision for one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Negative-class probability
    pub score: f64,
    pub label: Label,
}

impl<C> ClassifierBundle<C> {
    pub fn new(
        config: &TrainerConfig,
        windows: EpochWindows,
        epochs: &Epochs,
        fit_state: FitState,
        classifier: C,
        threshold: f64,
    ) -> Self {
        ClassifierBundle {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            apply_car: config.apply_car,
            sfreq: epochs.sfreq,
            picks: config.picks.clone(),
            ch_names: epochs.ch_names.clone(),
            event_codes: config.event_codes,
            tmin: windows.tmin,
            tmax: windows.tmax,
            tlow: windows.tlow,
            thigh: windows.thigh,
            l_freq: config.l_freq,
            h_freq: config.h_freq,
            filter_method: config.filter_method,
            baseline: config.baseline,
            decimation: config.decimation,
            wframes: epochs.data.n_times(),
            normalization: fit_state.normalization,
            projection: fit_state.projection,
            explained_variance: config.explained_variance,
            classifier,
            threshold,
        }
    }

    /// Epoch windows the bundle was trained with
    pub fn windows(&self) -> EpochWindows {
        EpochWindows {
            tmin: self.tmin,
            tmax: self.tmax,
            tlow: self.tlow,
            thigh: self.thigh,
        }
    }

    /// Preprocessing that produced the training epochs
    pub fn preprocess_params(&self) -> PreprocessParams {
        PreprocessParams {
            apply_car: self.apply_car,
            picks: self.picks.clone(),
            filter_method: self.filter_method,
            l_freq: self.l_freq,
            h_freq: self.h_freq,
            baseline: self.baseline,
            event_codes: self.event_codes,
        }
    }

    /// Parameters to rebuild the feature pipeline
    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            sfreq: self.sfreq,
            windows: self.windows(),
            filter_method: self.filter_method,
            l_freq: self.l_freq,
            h_freq: self.h_freq,
            decimation: self.decimation,
            apply_pca: self.projection.is_some(),
            explained_variance: self.explained_variance,
        }
    }

    pub fn fit_state(&self) -> FitState {
        FitState {
            normalization: self.normalization.clone(),
            projection: self.projection.clone(),
        }
    }
}

impl<C: Classifier> ClassifierBundle<C> {
    /// Run padded epochs through the stored pipeline and threshold
    pub fn score_epochs(&self, epochs: &EpochTensor) -> Result<Vec<Decision>, BundleError> {
        let extractor = FeatureExtractor::new(self.feature_params());
        let features = extractor.transform(epochs, &self.fit_state())?;
        let probabilities = self.classifier.predict_proba(&features)?;

        Ok(probabilities
            .iter()
            .map(|p| {
                let score = p[Label::Negative.index()];
                let label = if score < self.threshold {
                    Label::Positive
                } else {
                    Label::Negative
                };
                Decision { score, label }
            })
            .collect())
    }
}

impl<C: Serialize> ClassifierBundle<C> {
    /// Pretty JSON encoding
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, BundleError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

impl<C: DeserializeOwned> ClassifierBundle<C> {
    /// Decode a bundle from JSON
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, BundleError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Writes bundles to `<dataset_dir>/errp_classifier/errp_classifier.json`
pub struct BundleWriter {
    dataset_dir: PathBuf,
}

impl BundleWriter {
    /// Writer rooted at a dataset directory
    pub fn new(dataset_dir: impl Into<PathBuf>) -> Self {
        BundleWriter {
            dataset_dir: dataset_dir.into(),
        }
    }

    /// Dataset directory the bundle lives under
    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// Full path of the bundle file
    pub fn bundle_path(&self) -> PathBuf {
        self.dataset_dir.join(BUNDLE_DIR).join(BUNDLE_FILE)
    }

    /// Write the bundle, replacing any previous one
    /// Returns the file path and the SHA-256 of the written bytes
    pub fn write<C: Serialize>(&self, bundle: &ClassifierBundle<C>) -> Result<(PathBuf, String), BundleError> {
        let path = self.bundle_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = bundle.to_json_bytes()?;
        let mut file = fs::File::create(&path)?;
        file.write_all(&data)?;
        file.flush()?;

        let hash = calculate_sha256(&data);
        log::info!("Wrote classifier bundle {} to {:?} (sha256 {})", bundle.id, path, hash);
        Ok((path, hash))
    }

    /// Load the bundle stored under this writer's dataset directory
    pub fn load<C: DeserializeOwned>(&self) -> Result<ClassifierBundle<C>, BundleError> {
        Self::load_from(&self.bundle_path())
    }

    /// Load a bundle from an explicit path
    pub fn load_from<C: DeserializeOwned>(path: &Path) -> Result<ClassifierBundle<C>, BundleError> {
        ClassifierBundle::from_json_bytes(&fs::read(path)?)
    }
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
