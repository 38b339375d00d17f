//! Error types.

use std::io;

use thiserror::Error;

/// Errors surfaced to callers.
///
/// Only launching can fail. Timeouts and cancellation are reported as `false`
/// from the wait operations, and termination failures during disposal are
/// logged and swallowed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable was not found or the OS refused to create the process.
    #[error("failed to start process `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// The OS error kind behind this error.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Launch { source, .. } => source.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
