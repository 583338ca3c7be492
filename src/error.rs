use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole run or batch.
///
/// Per-file problems never surface here; they are converted into
/// statistics and progress reports by the dispatcher (see [`FileError`]).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown or disabled backend, invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend could not be loaded; no file of the batch was attempted.
    #[error("failed to initialize backend '{backend}': {reason}")]
    Init { backend: String, reason: String },

    #[error("input folder not found: {0}")]
    InputNotFound(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Outcome of a single file that did not produce an output artifact.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("unsupported file extension")]
    Unsupported,

    #[error("output already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("file is still being written")]
    Unstable,

    #[error("file vanished before processing")]
    VanishedBeforeProcessing,

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("backend transform failed: {0}")]
    Backend(String),

    #[error("failed to write {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("failed to move original to {path}: {source}")]
    Move {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    /// Skips are counted separately and never touch failure statistics.
    pub fn is_skip(&self) -> bool {
        matches!(self, FileError::Unsupported | FileError::AlreadyExists(_))
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root not found: {0}")]
    NotFound(PathBuf),

    #[error("watcher is already active")]
    AlreadyActive,

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
