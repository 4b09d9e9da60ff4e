// Error Types
// Configuration errors fail fast at load time; detector errors are recovered locally.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid {field}: {message}")]
    Invalid { field: String, message: String },
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },
    #[error("Bad pattern in {owner}: {pattern} ({source})")]
    BadPattern {
        owner: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Baseline for {document_type} references unknown category {category}")]
    UnknownCategory {
        document_type: String,
        category: String,
    },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single detector. Never fatal to an analysis run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("timed out after {ms} ms")]
    TimedOut { ms: u64 },
    #[error("detector panicked: {0}")]
    Panicked(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DetectorError {
    /// Short machine-readable code used in reduced-confidence flags.
    pub fn code(&self) -> &'static str {
        match self {
            DetectorError::InsufficientData(_) => "insufficient_data",
            DetectorError::TimedOut { .. } => "timeout",
            DetectorError::Panicked(_) => "panicked",
            DetectorError::Internal(_) => "internal",
        }
    }
}
