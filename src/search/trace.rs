// Search progress tracing
// Append-only JSONL file, one line per search event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Phase of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    Preprocess,
    Cell,
    Selection,
    Export,
}

/// One line of the trace file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,

    pub stage: SearchStage,

    /// Fraction of the grid completed, in [0, 1]
    pub progress: f32,

    pub message: String,

    /// Structured payload, e.g. cell coordinates and scores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(stage: SearchStage, progress: f32, message: impl Into<String>) -> Self {
        TraceEntry {
            timestamp: Utc::now(),
            stage,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn to_json_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }
}

/// Appends entries to a trace file, creating it on first write
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        TraceWriter {
            file_path: file_path.into(),
        }
    }

    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(entry.to_json_line()?.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Read every entry of a trace file, skipping blank lines
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(TraceError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_progress_clamping() {
        assert_eq!(TraceEntry::new(SearchStage::Cell, -0.5, "x").progress, 0.0);
        assert_eq!(TraceEntry::new(SearchStage::Cell, 1.5, "x").progress, 1.0);
    }

    #[test]
    fn test_entry_with_data() {
        let entry = TraceEntry::new(SearchStage::Cell, 0.25, "Cell done")
            .with_data(serde_json::json!({ "padding": 0.1, "auc": 0.87 }));
        assert_eq!(entry.data.unwrap()["auc"], 0.87);
    }

    #[test]
    fn test_json_line_format() {
        let line = TraceEntry::new(SearchStage::Export, 1.0, "Written")
            .to_json_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains(r#""stage":"export""#));
        assert!(!line.contains("data"));
    }

    #[test]
    fn test_trace_writer_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("search.jsonl");
        let writer = TraceWriter::new(&path);

        writer
            .write(&TraceEntry::new(SearchStage::Preprocess, 0.0, "Start"))
            .unwrap();
        writer
            .write(&TraceEntry::new(SearchStage::Cell, 0.5, "Halfway"))
            .unwrap();

        let entries = read_trace_file(writer.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, SearchStage::Preprocess);
        assert_eq!(entries[1].progress, 0.5);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            read_trace_file(&temp_dir.path().join("absent.jsonl")),
            Err(TraceError::Io(_))
        ));
    }
}
