//! Error types for funnelscope

use crate::types::ProcessStep;
use thiserror::Error;

/// Errors that can occur while loading data or computing metrics
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("No qualifying transitions from '{from}' to '{to}'")]
    NoData { from: ProcessStep, to: ProcessStep },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Degenerate input for statistical test: {0}")]
    DegenerateInput(String),

    #[error("Date parse error: {0}")]
    DateParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
