//! Error types for gitdeck

use std::time::Duration;

use thiserror::Error;

/// Result type alias for gitdeck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gitdeck operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A subprocess exited with a status the caller did not declare as expected
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    Process {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A subprocess ran past its allotted time and was killed
    #[error("`{command}` timed out after {elapsed:?}")]
    Timeout { command: String, elapsed: Duration },

    /// No usable credentials could be obtained for a remote
    #[error("Authentication failed for {host}: {reason}")]
    Authentication { host: String, reason: String },

    /// Tool output did not have the expected shape
    #[error("Unexpected {context} output: {fragment:?}")]
    Parse {
        context: &'static str,
        fragment: String,
    },

    /// A queued task was cancelled before it started
    #[error("Task was cancelled before it started")]
    Cancelled,

    /// A task failed inside the repository queue before producing a result
    #[error("Repository queue error: {0}")]
    Queue(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A path outside of what the operation is allowed to touch
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a parse error carrying the offending raw fragment
    pub fn parse(context: &'static str, fragment: impl Into<String>) -> Self {
        Error::Parse {
            context,
            fragment: fragment.into(),
        }
    }

    /// Whether this is a process failure with the given exit code
    pub fn is_exit_code(&self, code: i32) -> bool {
        matches!(self, Error::Process { exit_code, .. } if *exit_code == code)
    }
}
