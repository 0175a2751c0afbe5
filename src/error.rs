// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions for a run. Wrapped in `anyhow::Error` on the way up;
/// callers that need to classify a failure can `downcast_ref::<EtlError>()`.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Non-success HTTP status, network failure, or unreadable source file.
    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// Local filesystem or remote store write failed.
    #[error("write to {} failed: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EtlError {
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        EtlError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EtlError::WriteFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A single feed record that could not be coerced into the output schema.
/// Absorbed by the transformer: logged, counted, and left out of the batch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("record {id}: {reason}")]
pub struct RecordMalformed {
    pub id: String,
    pub reason: String,
}
