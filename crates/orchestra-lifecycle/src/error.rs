//! Error types for the lifecycle core.
//!
//! # Error Hierarchy
//!
//! ```text
//! Error (top-level)
//! ├── Handle(HandleError)
//! ├── ProcessTable(ProcessTableError)
//! ├── Config { path, reason }
//! ├── Signal(std::io::Error)
//! └── Logging(String)
//! ```
//!
//! The lifecycle operations themselves (`track`, `stop`, `find_and_reap_orphans`, ...)
//! never surface these errors: they log them and report a boolean or a count.
//! `Result` is only returned where a caller can act on the failure, such as
//! loading configuration or installing signal handlers.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure talking to an OS process.
    #[error("Process handle error: {0}")]
    Handle(#[from] HandleError),

    /// Failure enumerating the OS process table.
    #[error("Process table error: {0}")]
    ProcessTable(#[from] ProcessTableError),

    /// Configuration could not be read, parsed or written.
    #[error("Configuration error at {path:?}: {reason}")]
    Config {
        /// File involved
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Registering an OS signal listener failed.
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// The global tracing subscriber could not be installed.
    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl Error {
    pub(crate) fn config(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a [`ProcessHandle`](crate::process::ProcessHandle).
#[derive(Debug, Error)]
pub enum HandleError {
    /// The handle carries no PID (spawn failed or the child was already reaped).
    #[error("process handle has no PID")]
    NoPid,

    /// The PID cannot be addressed safely (0, or outside the platform range).
    #[error("refusing to signal invalid PID {pid}")]
    InvalidPid {
        /// The rejected PID
        pid: u32,
    },

    /// The process no longer exists.
    #[error("process {pid} no longer exists")]
    NoSuchProcess {
        /// PID that vanished
        pid: u32,
    },

    /// The process exists but belongs to someone else.
    #[error("permission denied for process {pid}")]
    PermissionDenied {
        /// PID that could not be signalled
        pid: u32,
    },

    /// I/O error from the child handle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other signal delivery failure.
    #[error("failed to deliver {signal} to process {pid}: {reason}")]
    Signal {
        /// PID targeted
        pid: u32,
        /// Signal name
        signal: &'static str,
        /// OS description
        reason: String,
    },

    /// The operation is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

impl HandleError {
    /// True if the error means the target is already gone.
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::NoSuchProcess { .. })
    }
}

/// Errors raised while enumerating the process table.
#[derive(Debug, Error)]
pub enum ProcessTableError {
    /// The table could not be read at all.
    #[error("failed to enumerate processes: {0}")]
    Enumeration(String),
}
