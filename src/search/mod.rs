// Search module
// Grid search over padding and regularization, with optional JSONL progress trace

pub mod grid;
pub mod trace;

pub use grid::{CellResult, HyperparameterSearch, SearchError, SearchOutcome};
pub use trace::{read_trace_file, SearchStage, TraceEntry, TraceError, TraceWriter};
