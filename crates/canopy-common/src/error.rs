//! Error types for external tool invocation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from running an external program.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The program exited with a nonzero status.
    #[error("`{program}` exited with {status}: {stderr}")]
    NonZeroExit {
        /// Program name.
        program: String,
        /// Exit status description.
        status: String,
        /// Trailing stderr output.
        stderr: String,
    },

    /// The program succeeded but did not produce an expected output file.
    #[error("`{program}` did not produce {}", path.display())]
    MissingOutput {
        /// Program name.
        program: String,
        /// Expected output path.
        path: PathBuf,
    },

    /// The program produced an empty output file.
    #[error("`{program}` produced an empty file {}", path.display())]
    EmptyOutput {
        /// Program name.
        program: String,
        /// Output path.
        path: PathBuf,
    },

    /// The deadline passed and the child was killed.
    #[error("`{program}` exceeded its deadline and was killed")]
    DeadlineExceeded {
        /// Program name.
        program: String,
    },

    /// The batch was cancelled and the child was killed.
    #[error("`{program}` was cancelled")]
    Cancelled {
        /// Program name.
        program: String,
    },

    /// I/O error while supervising the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
