//! Error types for execbox-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::ExecutionId;

/// Result type for execbox-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in execbox-core.
///
/// Only transport-level failures live here. A program that fails to compile,
/// crashes, times out or is stopped is a normal outcome and is reported
/// through [`crate::ExecutionStatus`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Language identifier not present in the registry.
    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    /// Workspace directory or file could not be created.
    #[error("failed to prepare workspace at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A toolchain or program binary could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No live session matches the execution id.
    #[error("execution {0} not found or already completed")]
    NotFound(ExecutionId),

    /// The session exists but its standard input is not writable.
    #[error("execution {0} does not accept input")]
    InputUnavailable(ExecutionId),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller, rather than the sandbox, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_)
                | Error::UnsupportedLanguage(_)
                | Error::NotFound(_)
                | Error::InputUnavailable(_)
        )
    }
}
