// Hyperparameter search
// Padding x regularization grid over cross-validated, threshold-calibrated classifiers

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bundle::{BundleError, BundleWriter, ClassifierBundle};
use crate::calibration::{CalibrationError, ThresholdCalibrator};
use crate::classifier::{Classifier, ClassifierError};
use crate::config::{ConfigError, ExportCriterion, TrainerConfig};
use crate::features::{FeatureError, FeatureExtractor, FeatureParams};
use crate::recording::{Epochs, PreprocessError, Recording, SignalPreprocessor};
use crate::search::trace::{SearchStage, TraceEntry, TraceError, TraceWriter};
use crate::validation::{CrossValidationEngine, FoldCache, NormalizedConfusion, ValidationError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Cell (padding {padding}, reg {reg_coeff}): {source}")]
    Validation {
        padding: f64,
        reg_coeff: f64,
        #[source]
        source: ValidationError,
    },

    #[error("Cell (padding {padding}, reg {reg_coeff}): {source}")]
    Calibration {
        padding: f64,
        reg_coeff: f64,
        #[source]
        source: CalibrationError,
    },

    #[error("Refit failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("Refit failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scores of one (padding, regularization) grid cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellResult {
    pub padding: f64,
    pub reg_coeff: f64,
    pub auc: f64,

    /// Selected operating point
    pub threshold: f64,
    pub tpr: f64,
    pub fpr: f64,

    /// Normalized confusion matrix at the selected threshold
    pub confusion: NormalizedConfusion,

    /// Mean cross-validation matrix at the classifier's own decision rule
    pub cv_confusion: NormalizedConfusion,
}

/// All cells in row-major order (padding outer, regularization inner)
/// plus the two winners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub cells: Vec<CellResult>,
    pub n_paddings: usize,
    pub n_reg_coeffs: usize,
    best_auc: usize,
    best_tpr: usize,
}

/// Index of the first maximum
fn first_max(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, value) in values.enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((i, value)),
        }
    }
    best.map(|(i, _)| i)
}

impl SearchOutcome {
    /// Select winners over row-major cells; `None` if there are no cells
    /// or they do not fill an `n_paddings x n_reg_coeffs` grid
    pub fn from_cells(cells: Vec<CellResult>, n_paddings: usize, n_reg_coeffs: usize) -> Option<Self> {
        if cells.len() != n_paddings * n_reg_coeffs {
            return None;
        }
        let best_auc = first_max(cells.iter().map(|c| c.auc))?;
        let best_tpr = first_max(cells.iter().map(|c| c.tpr))?;
        Some(SearchOutcome {
            cells,
            n_paddings,
            n_reg_coeffs,
            best_auc,
            best_tpr,
        })
    }

    /// Cell with the highest AUC, first in row-major order on ties
    pub fn best_auc(&self) -> &CellResult {
        &self.cells[self.best_auc]
    }

    /// Cell with the highest TPR at its calibrated threshold
    pub fn best_tpr(&self) -> &CellResult {
        &self.cells[self.best_tpr]
    }

    /// Winner under an export criterion
    pub fn selected(&self, criterion: ExportCriterion) -> &CellResult {
        match criterion {
            ExportCriterion::BestAuc => self.best_auc(),
            ExportCriterion::BestTpr => self.best_tpr(),
        }
    }

    /// Human-readable report of both winners and the AUC grid
    pub fn summary(&self) -> String {
        self.to_string()
    }

    /// Write the summary to `<dir>/results-<name>.txt`
    pub fn write_summary(&self, dir: &Path, name: &str) -> Result<PathBuf, SearchError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("results-{}.txt", name));
        fs::write(&path, self.summary())?;
        log::info!("Wrote search summary to {:?}", path);
        Ok(path)
    }
}

impl fmt::Display for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (title, value, cell) in [
            ("Best AUC", self.best_auc().auc, self.best_auc()),
            ("Best TP rate", self.best_tpr().tpr, self.best_tpr()),
        ] {
            writeln!(f, "{}: {:.4}", title, value)?;
            writeln!(
                f,
                "With param (padding, reg_coeff): ({}, {})",
                cell.padding, cell.reg_coeff
            )?;
            writeln!(f, "TPR {:.4}, FPR {:.4}", cell.tpr, cell.fpr)?;
            writeln!(f, "And CM:")?;
            write!(f, "{}", cell.confusion)?;
            writeln!(f, "At threshold: {:.4}", cell.threshold)?;
            writeln!(f, "-------")?;
        }

        writeln!(f, "AUC grid (rows: padding, columns: reg_coeff)")?;
        write!(f, "{:>8}", "")?;
        for cell in self.cells.iter().take(self.n_reg_coeffs) {
            write!(f, " {:>6.2}", cell.reg_coeff)?;
        }
        writeln!(f)?;
        for row in self.cells.chunks(self.n_reg_coeffs.max(1)) {
            write!(f, "{:>8.2}", row[0].padding)?;
            for cell in row {
                write!(f, " {:>6.3}", cell.auc)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Grid search over temporal padding and classifier regularization
pub struct HyperparameterSearch {
    config: TrainerConfig,
    trace: Option<TraceWriter>,
}

impl HyperparameterSearch {
    /// Validate `config` and build a search without tracing
    pub fn new(config: TrainerConfig) -> Result<Self, SearchError> {
        config.validate()?;
        Ok(HyperparameterSearch {
            config,
            trace: None,
        })
    }

    /// Append one JSON line per search event to `writer`
    pub fn with_trace(mut self, writer: TraceWriter) -> Self {
        self.trace = Some(writer);
        self
    }

    /// Validated configuration
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn record(&self, entry: TraceEntry) -> Result<(), SearchError> {
        if let Some(writer) = &self.trace {
            writer.write(&entry)?;
        }
        Ok(())
    }

    fn epochs_for(&self, recording: &Recording, padding: f64) -> Result<(Epochs, FeatureExtractor), SearchError> {
        let windows = self.config.windows(padding);
        let epochs = SignalPreprocessor::from_config(&self.config).run(recording, &windows)?;
        let extractor = FeatureExtractor::new(FeatureParams::from_config(&self.config, windows, epochs.sfreq));
        Ok((epochs, extractor))
    }

    /// Evaluate every grid cell and select the winners
    ///
    /// `make_classifier` builds an unfitted classifier for a regularization
    /// coefficient. Features are computed once per padding and reused for
    /// every coefficient of that row. Any cell failure aborts the search.
    pub fn run<C, F>(&self, recording: &Recording, make_classifier: F) -> Result<SearchOutcome, SearchError>
    where
        C: Classifier,
        F: Fn(f64) -> C,
    {
        let grid = &self.config.grid;
        let total = grid.paddings.len() * grid.reg_coeffs.len();
        let calibrator = ThresholdCalibrator::new(self.config.max_fpr);
        let mut cache = FoldCache::new();
        let mut cells = Vec::with_capacity(total);

        log::info!(
            "Searching {} paddings x {} regularization values",
            grid.paddings.len(),
            grid.reg_coeffs.len()
        );

        for &padding in grid.paddings.iter() {
            self.record(TraceEntry::new(
                SearchStage::Preprocess,
                cells.len() as f32 / total as f32,
                format!("Epoching with padding {} s", padding),
            ))?;
            let (epochs, extractor) = self.epochs_for(recording, padding)?;
            let engine = CrossValidationEngine::new(self.config.fold_strategy.clone(), extractor);
            cache.clear();

            for &reg_coeff in grid.reg_coeffs.iter() {
                let outcome = engine
                    .evaluate(&epochs.data, &epochs.labels, || make_classifier(reg_coeff), &mut cache)
                    .map_err(|source| SearchError::Validation {
                        padding,
                        reg_coeff,
                        source,
                    })?;
                let calibration = calibrator
                    .calibrate(&outcome.scores, &outcome.labels)
                    .map_err(|source| SearchError::Calibration {
                        padding,
                        reg_coeff,
                        source,
                    })?;

                let cell = CellResult {
                    padding,
                    reg_coeff,
                    auc: calibration.auc,
                    threshold: calibration.best.threshold,
                    tpr: calibration.best.tpr,
                    fpr: calibration.best.fpr,
                    confusion: calibration.best.confusion,
                    cv_confusion: outcome.mean_confusion,
                };
                log::info!(
                    "padding {:.2}, reg {:.2}: AUC {:.4}, TPR {:.4}, FPR {:.4} at threshold {:.4}",
                    padding,
                    reg_coeff,
                    cell.auc,
                    cell.tpr,
                    cell.fpr,
                    cell.threshold
                );
                cells.push(cell);

                self.record(
                    TraceEntry::new(
                        SearchStage::Cell,
                        cells.len() as f32 / total as f32,
                        format!("Evaluated padding {} reg {}", padding, reg_coeff),
                    )
                    .with_data(serde_json::json!({
                        "padding": padding,
                        "reg_coeff": reg_coeff,
                        "auc": calibration.auc,
                        "tpr": calibration.best.tpr,
                        "fpr": calibration.best.fpr,
                        "threshold": calibration.best.threshold,
                        "cache_hits": cache.hits(),
                        "cache_misses": cache.misses(),
                    })),
                )?;
            }
        }

        let outcome = SearchOutcome::from_cells(cells, grid.paddings.len(), grid.reg_coeffs.len())
            .ok_or(ConfigError::EmptyGrid("search"))?;

        let (auc, tpr) = (outcome.best_auc(), outcome.best_tpr());
        log::info!(
            "Best AUC {:.4} at (padding {}, reg {}); best TPR {:.4} at (padding {}, reg {})",
            auc.auc,
            auc.padding,
            auc.reg_coeff,
            tpr.tpr,
            tpr.padding,
            tpr.reg_coeff
        );
        self.record(
            TraceEntry::new(SearchStage::Selection, 1.0, "Search complete").with_data(serde_json::json!({
                "best_auc": { "padding": auc.padding, "reg_coeff": auc.reg_coeff, "auc": auc.auc },
                "best_tpr": { "padding": tpr.padding, "reg_coeff": tpr.reg_coeff, "tpr": tpr.tpr },
            })),
        )?;

        Ok(outcome)
    }

    /// Refit the full pipeline on all epochs with one cell's hyperparameters
    pub fn train_bundle<C, F>(
        &self,
        recording: &Recording,
        cell: &CellResult,
        make_classifier: F,
    ) -> Result<ClassifierBundle<C>, SearchError>
    where
        C: Classifier,
        F: Fn(f64) -> C,
    {
        let (epochs, extractor) = self.epochs_for(recording, cell.padding)?;
        let (features, fit_state) = extractor.fit_transform(&epochs.data)?;

        let mut classifier = make_classifier(cell.reg_coeff);
        classifier.fit(&features, &epochs.labels)?;

        Ok(ClassifierBundle::new(
            &self.config,
            extractor.params().windows,
            &epochs,
            fit_state,
            classifier,
            cell.threshold,
        ))
    }

    /// Search, refit the winner chosen by the configured export criterion and write it
    pub fn run_and_export<C, F>(
        &self,
        recording: &Recording,
        make_classifier: F,
        writer: &BundleWriter,
    ) -> Result<(SearchOutcome, PathBuf, String), SearchError>
    where
        C: Classifier + Serialize,
        F: Fn(f64) -> C,
    {
        let outcome = self.run(recording, &make_classifier)?;
        let cell = outcome.selected(self.config.export).clone();
        let bundle = self.train_bundle(recording, &cell, &make_classifier)?;
        let (path, hash) = writer.write(&bundle)?;

        self.record(
            TraceEntry::new(SearchStage::Export, 1.0, "Bundle written").with_data(serde_json::json!({
                "path": path.display().to_string(),
                "sha256": hash,
                "padding": cell.padding,
                "reg_coeff": cell.reg_coeff,
            })),
        )?;
        Ok((outcome, path, hash))
    }
}
