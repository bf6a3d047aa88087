//! Shell error types.

use crate::command::{ExitCode, FAILURE, NOT_FOUND, PERMISSION_DENIED};
use nix::errno::Errno;
use std::fmt::Display;
use thiserror::Error;

/// Prefix for every message the shell itself writes to standard error.
pub const ERROR_PREFIX: &str = "jobsh: error: ";

#[derive(Debug, Error)]
pub enum ShellError {
    /// Malformed operator sequence or wrong arguments.
    #[error("{0}")]
    Usage(String),

    #[error("{0}: command not found")]
    NotFound(String),

    #[error("{0}: permission denied")]
    PermissionDenied(String),

    /// The OS refused to create the process.
    #[error("cannot launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: Errno,
    },

    /// A redirection target could not be opened.
    #[error("{path}: {source}")]
    Resource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("startup failed: {0}")]
    FatalStartup(String),
}

impl ShellError {
    /// Exit status reported to the caller for this failure.
    pub fn status(&self) -> ExitCode {
        match self {
            ShellError::NotFound(_) => NOT_FOUND,
            ShellError::PermissionDenied(_) => PERMISSION_DENIED,
            _ => FAILURE,
        }
    }
}

/// Write a user-facing error to standard error.
pub fn report(err: impl Display) {
    eprintln!("{ERROR_PREFIX}{err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_shell_convention() {
        assert_eq!(ShellError::Usage("x".into()).status(), 1);
        assert_eq!(ShellError::NotFound("x".into()).status(), 127);
        assert_eq!(ShellError::PermissionDenied("x".into()).status(), 126);
        let launch = ShellError::Launch {
            program: "x".into(),
            source: Errno::EAGAIN,
        };
        assert_eq!(launch.status(), 1);
    }

    #[test]
    fn not_found_message_names_the_program() {
        let err = ShellError::NotFound("frobnicate".into());
        assert_eq!(err.to_string(), "frobnicate: command not found");
    }
}
