// Two-class confusion matrices
// Rows are true classes, columns predicted classes, both in Label::ALL order

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::recording::Label;

/// Raw prediction counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    counts: [[u32; 2]; 2],
}

impl ConfusionMatrix {
    /// Count paired (truth, prediction) entries
    pub fn from_predictions(truth: &[Label], predicted: &[Label]) -> Self {
        let mut matrix = ConfusionMatrix::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            matrix.record(t, p);
        }
        matrix
    }

    /// Count one decision
    pub fn record(&mut self, truth: Label, predicted: Label) {
        self.counts[truth.index()][predicted.index()] += 1;
    }

    pub fn counts(&self) -> [[u32; 2]; 2] {
        self.counts
    }

    /// Count for a (truth, predicted) pair
    pub fn get(&self, truth: Label, predicted: Label) -> u32 {
        self.counts[truth.index()][predicted.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().flatten().sum()
    }

    /// Divide each row by its total; rows without samples stay zero
    pub fn normalized(&self) -> NormalizedConfusion {
        let rows = self.counts.map(|row| {
            let total: u32 = row.iter().sum();
            if total == 0 {
                [0.0; 2]
            } else {
                row.map(|c| c as f64 / total as f64)
            }
        });
        NormalizedConfusion { rows }
    }
}

/// Row-normalized confusion matrix
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedConfusion {
    pub rows: [[f64; 2]; 2],
}

impl NormalizedConfusion {
    /// Fraction of positive trials predicted positive
    pub fn tpr(&self) -> f64 {
        self.rows[Label::Positive.index()][Label::Positive.index()]
    }

    /// Fraction of negative trials predicted positive
    pub fn fpr(&self) -> f64 {
        self.rows[Label::Negative.index()][Label::Positive.index()]
    }

    /// Element-wise mean, `None` for an empty slice
    pub fn mean(matrices: &[NormalizedConfusion]) -> Option<NormalizedConfusion> {
        if matrices.is_empty() {
            return None;
        }
        let mut rows = [[0.0; 2]; 2];
        for matrix in matrices {
            for (i, row) in matrix.rows.iter().enumerate() {
                for (j, value) in row.iter().enumerate() {
                    rows[i][j] += value;
                }
            }
        }
        let n = matrices.len() as f64;
        Some(NormalizedConfusion {
            rows: rows.map(|row| row.map(|v| v / n)),
        })
    }
}

impl fmt::Display for NormalizedConfusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>9} {:>9}", "", "->pos", "->neg")?;
        for label in Label::ALL {
            let row = self.rows[label.index()];
            writeln!(f, "{:>10} {:>9.3} {:>9.3}", label.display_name(), row[0], row[1])?;
        }
        Ok(())
    }
}
