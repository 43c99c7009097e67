// error.rs - Error types for the ephemeral workspace subsystem.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while acquiring, using, or inspecting a workspace.
///
/// A non-zero exit code from a launched command is not an error; it is
/// reported through [`RunResult::exit_code`](crate::RunResult::exit_code).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The temporary directory or one of the requested files could not be
    /// created. Any partially built directory has already been removed.
    #[error("failed to create workspace at {path}: {source}")]
    Creation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A caller-supplied relative path was rejected during acquisition.
    #[error("invalid workspace path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// The external program could not be found or started.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    /// The external program exceeded its time budget and was killed.
    ///
    /// Carries whatever output was captured before termination.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout {
        program: String,
        timeout: Duration,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    /// The workspace was already released.
    #[error("workspace at {root} has already been released")]
    UseAfterRelease { root: PathBuf },

    /// `run` was called with an empty command vector.
    #[error("command must contain at least a program name")]
    EmptyCommand,

    /// A file I/O operation on a live workspace failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested file does not exist in the workspace.
    #[error("file not found in workspace: '{path}'")]
    FileNotFound { path: String },
}

impl WorkspaceError {
    /// True for the errors that abort an acquisition attempt.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            WorkspaceError::Creation { .. } | WorkspaceError::InvalidPath { .. }
        )
    }
}
