use std::path::PathBuf;

use thiserror::Error;

/// Everything a session command can fail with.
///
/// Handlers return these; the dispatcher turns them into an `ERROR`
/// envelope, so none of them ever reaches the caller as a fault.
#[derive(Debug, Error)]
pub enum CoderError {
    #[error("Path traversal denied: '{0}' resolves outside the sandbox")]
    PathTraversalDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Command '{0}' is not in the allowlist")]
    CommandNotAllowlisted(String),

    #[error("Autonomous mode is not enabled. Cannot delete files. Use 'toggle_autonomous_mode'.")]
    DestructiveOperationBlocked,

    #[error("Unknown command: '{command}'. Available commands are: {available}")]
    UnknownCommand { command: String, available: String },

    #[error("Invalid parameters for command '{command}': {reason}")]
    InvalidParams { command: String, reason: String },

    #[error("Invalid parameters: path must be a non-empty string")]
    EmptyPath,

    #[error("Invalid command line: {0}")]
    InvalidCommandLine(String),

    #[error("'{0}' does not appear to be a valid venv")]
    VenvInvalid(String),

    #[error("Failed to create venv: {0}")]
    VenvCreationFailed(String),

    #[error("Command timed out after {}s", .0.as_secs())]
    TimeoutExceeded(std::time::Duration),

    #[error("Failed to launch '{program}': {source}")]
    SubprocessLaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoderError {
    /// Stable name reported in the `error` field of the result envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathTraversalDenied(_) => "PathTraversalDenied",
            Self::NotFound(_) => "NotFound",
            Self::NotADirectory(_) => "NotADirectory",
            Self::NotAFile(_) => "NotAFile",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::CommandNotAllowlisted(_) => "CommandNotAllowlisted",
            Self::DestructiveOperationBlocked => "DestructiveOperationBlocked",
            Self::UnknownCommand { .. } => "UnknownCommand",
            Self::InvalidParams { .. } | Self::EmptyPath => "InvalidParams",
            Self::InvalidCommandLine(_) => "InvalidCommandLine",
            Self::VenvInvalid(_) => "VenvInvalid",
            Self::VenvCreationFailed(_) => "VenvCreationFailed",
            Self::TimeoutExceeded(_) => "TimeoutExceeded",
            Self::SubprocessLaunchFailed { .. } => "SubprocessLaunchFailed",
            Self::Io { .. } => "Io",
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoderError>;
