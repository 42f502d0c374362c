// Cross-validation engine
// Featurizes each fold once, then fits a fresh classifier per fold and pools scores

use nalgebra::DMatrix;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::classifier::{Classifier, ClassifierError};
use crate::features::{FeatureError, FeatureExtractor, FeatureParams};
use crate::recording::{EpochError, EpochTensor, Label};
use crate::validation::confusion::{ConfusionMatrix, NormalizedConfusion};
use crate::validation::folds::{Fold, FoldError, FoldStrategy};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{trials} trials but {labels} labels")]
    LabelCountMismatch { trials: usize, labels: usize },

    #[error("Fold cache was filled under a different feature configuration")]
    StaleFoldCache,

    #[error("Fold generation failed: {0}")]
    Folds(#[from] FoldError),

    #[error("Fold {fold}: {source}")]
    Feature {
        fold: usize,
        #[source]
        source: FeatureError,
    },

    #[error("Fold {fold}: {source}")]
    Classifier {
        fold: usize,
        #[source]
        source: ClassifierError,
    },

    #[error("Epoch selection failed: {0}")]
    Epoch(#[from] EpochError),
}

/// Train and test features of one fold with their labels
#[derive(Debug, Clone, PartialEq)]
pub struct FoldFeatures {
    pub train: DMatrix<f64>,
    pub train_labels: Vec<Label>,
    pub test: DMatrix<f64>,
    pub test_labels: Vec<Label>,
}

/// What the cached features depend on
#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    params: FeatureParams,
    strategy: FoldStrategy,
    n_trials: usize,
}

/// Memoized fold features, keyed by fold index
///
/// Valid for one feature configuration only. The first `evaluate` call binds
/// the cache to its configuration; a later call under another configuration
/// fails with [`ValidationError::StaleFoldCache`] until [`FoldCache::clear`].
#[derive(Debug, Default)]
pub struct FoldCache {
    key: Option<CacheKey>,
    entries: BTreeMap<usize, FoldFeatures>,
    hits: usize,
    misses: usize,
}

impl FoldCache {
    /// Empty cache, bound on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all entries and the bound configuration
    pub fn clear(&mut self) {
        self.key = None;
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of cached folds
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached features of one fold
    pub fn get(&self, fold: usize) -> Option<&FoldFeatures> {
        self.entries.get(&fold)
    }

    /// Cached folds in fold order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FoldFeatures)> {
        self.entries.iter().map(|(&fold, features)| (fold, features))
    }

    /// Lookups served from the cache since the last clear
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Folds featurized since the last clear
    pub fn misses(&self) -> usize {
        self.misses
    }

    fn bind(&mut self, key: CacheKey) -> Result<(), ValidationError> {
        match &self.key {
            Some(bound) if *bound != key => Err(ValidationError::StaleFoldCache),
            Some(_) => Ok(()),
            None => {
                self.key = Some(key);
                Ok(())
            }
        }
    }
}

/// Pooled result of one cross-validation call
#[derive(Debug, Clone)]
pub struct CvOutcome {
    /// Negative-class probability per held-out trial, in fold-visitation order
    pub scores: Vec<f64>,

    /// True label per pooled score
    pub labels: Vec<Label>,

    /// Hard decision per pooled score
    pub predictions: Vec<Label>,

    /// One matrix per fold, or a single pooled matrix for leave-one-out
    pub matrices: Vec<ConfusionMatrix>,

    /// Mean of the row-normalized matrices
    pub mean_confusion: NormalizedConfusion,
}

pub struct CrossValidationEngine {
    strategy: FoldStrategy,
    extractor: FeatureExtractor,
}

impl CrossValidationEngine {
    /// Engine over a fixed fold strategy and feature pipeline
    pub fn new(strategy: FoldStrategy, extractor: FeatureExtractor) -> Self {
        CrossValidationEngine {
            strategy,
            extractor,
        }
    }

    /// Fold strategy used by `evaluate`
    pub fn strategy(&self) -> &FoldStrategy {
        &self.strategy
    }

    /// Feature pipeline fit per training fold
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Evaluate a classifier family over all folds
    ///
    /// Folds missing from `cache` are featurized and stored; present ones are
    /// reused unchanged. `make_classifier` is called once per fold.
    pub fn evaluate<C, F>(
        &self,
        epochs: &EpochTensor,
        labels: &[Label],
        make_classifier: F,
        cache: &mut FoldCache,
    ) -> Result<CvOutcome, ValidationError>
    where
        C: Classifier,
        F: Fn() -> C,
    {
        if epochs.n_trials() != labels.len() {
            return Err(ValidationError::LabelCountMismatch {
                trials: epochs.n_trials(),
                labels: labels.len(),
            });
        }

        cache.bind(CacheKey {
            params: self.extractor.params().clone(),
            strategy: self.strategy.clone(),
            n_trials: labels.len(),
        })?;

        let folds = self.strategy.generate(labels)?;
        let (hits_before, misses_before) = (cache.hits, cache.misses);

        let mut scores = Vec::new();
        let mut pooled_labels = Vec::new();
        let mut predictions = Vec::new();
        let mut matrices = Vec::new();

        for (index, fold) in folds.iter().enumerate() {
            let features = match cache.entries.entry(index) {
                Entry::Occupied(entry) => {
                    cache.hits += 1;
                    entry.into_mut()
                }
                Entry::Vacant(entry) => {
                    cache.misses += 1;
                    entry.insert(self.featurize(epochs, labels, fold, index)?)
                }
            };

            let classifier_error = |source: ClassifierError| ValidationError::Classifier {
                fold: index,
                source,
            };
            let mut classifier = make_classifier();
            classifier
                .fit(&features.train, &features.train_labels)
                .map_err(classifier_error)?;
            let fold_predictions = classifier.predict(&features.test).map_err(classifier_error)?;
            let probabilities = classifier
                .predict_proba(&features.test)
                .map_err(classifier_error)?;

            scores.extend(probabilities.iter().map(|p| p[Label::Negative.index()]));
            pooled_labels.extend_from_slice(&features.test_labels);
            if !self.strategy.is_leave_one_out() {
                matrices.push(ConfusionMatrix::from_predictions(
                    &features.test_labels,
                    &fold_predictions,
                ));
            }
            predictions.extend(fold_predictions);
        }

        let mean_confusion = if self.strategy.is_leave_one_out() {
            let pooled = ConfusionMatrix::from_predictions(&pooled_labels, &predictions);
            matrices.push(pooled);
            pooled.normalized()
        } else {
            let normalized: Vec<NormalizedConfusion> =
                matrices.iter().map(|m| m.normalized()).collect();
            NormalizedConfusion::mean(&normalized).unwrap_or_default()
        };

        log::info!(
            "Cross-validation: {} folds ({} cached, {} featurized), {} pooled scores",
            folds.len(),
            cache.hits - hits_before,
            cache.misses - misses_before,
            scores.len()
        );

        Ok(CvOutcome {
            scores,
            labels: pooled_labels,
            predictions,
            matrices,
            mean_confusion,
        })
    }

    fn featurize(
        &self,
        epochs: &EpochTensor,
        labels: &[Label],
        fold: &Fold,
        index: usize,
    ) -> Result<FoldFeatures, ValidationError> {
        let feature_error = |source: FeatureError| ValidationError::Feature {
            fold: index,
            source,
        };
        let train_epochs = epochs.select(&fold.train)?;
        let test_epochs = epochs.select(&fold.test)?;

        let (train, state) = self
            .extractor
            .fit_transform(&train_epochs)
            .map_err(feature_error)?;
        let test = self
            .extractor
            .transform(&test_epochs, &state)
            .map_err(feature_error)?;

        Ok(FoldFeatures {
            train,
            train_labels: fold.train.iter().map(|&i| labels[i]).collect(),
            test,
            test_labels: fold.test.iter().map(|&i| labels[i]).collect(),
        })
    }
}
