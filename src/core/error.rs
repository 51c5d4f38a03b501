//! Error taxonomy of the resolution core

use thiserror::Error;

/// Errors raised by the symbol table and the pipeline
#[derive(Debug, Error)]
pub enum CoreError {
    /// The collector produced no sketches for a file. Isolated to that file.
    #[error("parse failure in {path}: {message}")]
    ParseFailure { path: String, message: String },

    #[error("{path} exceeded the per-file timeout of {timeout_ms} ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("sink rejected a batch of {files} file(s) after {attempts} attempt(s): {source}")]
    SinkWriteFailure {
        files: usize,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    /// Input rejected before any write happened; the table is untouched
    #[error("invalid symbol set for {path}: {message}")]
    InvalidSymbols { path: String, message: String },

    /// A transactional invariant was violated; the run must halt
    #[error("symbol table corrupted: {0}")]
    TableCorruption(String),

    #[error("no collector registered for language '{0}'")]
    UnsupportedLanguage(String),

    #[error("task for {path} failed: {message}")]
    TaskFailed { path: String, message: String },

    #[error("task for {path} panicked: {message}")]
    TaskPanicked { path: String, message: String },
}

impl CoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::TableCorruption(_))
    }

    /// Turn a worker's error into a `CoreError`, keeping one that already is
    pub fn from_task(path: &str, err: anyhow::Error) -> Self {
        match err.downcast::<CoreError>() {
            Ok(core) => core,
            Err(other) => CoreError::TaskFailed {
                path: path.to_string(),
                message: format!("{:#}", other),
            },
        }
    }
}

/// Errors reported by a graph sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Storage(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
