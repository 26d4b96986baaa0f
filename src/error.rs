//! Error types and result alias for the crate.
//!
//! Every fatal condition of a run maps to one [`Error`] variant. Only
//! [`Error::OutputWrite`] is recoverable in the sense that the summary
//! computed before it can still be reported.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load input {path:?}: {reason}")]
    InputLoad { path: PathBuf, reason: String },

    #[error("join column '{column}' holds a {found} value that cannot be used as a text key")]
    JoinKeyTypeMismatch { column: String, found: String },

    #[error("region '{region}' has no usable population for category '{category}'{}", describe_value(.value))]
    MissingPopulation {
        region: String,
        category: String,
        value: Option<String>,
    },

    #[error("region '{region}' has a degenerate polygon (area {area}); gave up after {attempts} attempts")]
    DegeneratePolygon {
        region: String,
        area: f64,
        attempts: usize,
    },

    #[error("region '{region}', category '{category}': generated {actual} points, expected {expected}")]
    CountMismatch {
        region: String,
        category: String,
        expected: u32,
        actual: usize,
    },

    #[error("failed to write output {path:?}: {reason}")]
    OutputWrite { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn describe_value(value: &Option<String>) -> String {
    match value {
        Some(v) => format!(" (found '{v}')"),
        None => " (value absent)".to_owned(),
    }
}

impl Error {
    pub(crate) fn input_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::InputLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::OutputWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
