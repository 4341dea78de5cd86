use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring a method up. Fatal to that `start` call only; the caller
/// decides whether to retry or give up on the method.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("the method driver {} could not be found", path.display())]
    MethodNotFound { path: PathBuf },

    #[error("failed to spawn method {method}: {source}")]
    Spawn {
        method: String,
        source: std::io::Error,
    },

    #[error("failed to set up IPC pipe to method {method}: {source}")]
    Pipe {
        method: String,
        source: std::io::Error,
    },

    #[error("method {method} did not start correctly")]
    StartupFailure { method: String },
}

/// Failure of a running worker's request or I/O step.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("method {method} is not running")]
    NotRunning { method: String },

    /// The subprocess is gone; the worker was reset and must be restarted.
    #[error("method {method} died")]
    MethodDied { method: String },

    #[error("no owner registered for item {uri}")]
    UnknownItem { uri: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
