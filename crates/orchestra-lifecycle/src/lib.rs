//! # Orchestra Lifecycle
//!
//! Process-lifecycle core for the Claude orchestrator: everything that happens
//! to an OS process after it has been spawned.
//!
//! - [`ProcessRegistry`]: thread-safe map from a caller-chosen id to a process
//!   handle, with a PID membership set used to exclude tracked processes from
//!   orphan sweeps
//! - [`terminate`]: graceful signal, bounded wait, forced kill, bounded wait
//! - [`OrphanScanner`]: finds processes left behind by a crashed orchestrator
//!   and reaps them
//! - [`SignalCoordinator`]: single-shot registry drain on SIGTERM / SIGINT
//! - [`LifecycleManager`]: owns all of the above, built from [`LifecycleConfig`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orchestra_lifecycle::ProcessRegistry;
//! use std::time::Duration;
//! use tokio::process::Command;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = ProcessRegistry::new();
//!
//! let child = Command::new("claude")
//!     .args(["--dangerously-skip-permissions", "-p", "hello"])
//!     .spawn()
//!     .expect("failed to spawn");
//! registry.track_child("task-42", child);
//!
//! assert!(registry.is_running("task-42"));
//!
//! // SIGTERM, up to 10s grace, then SIGKILL
//! let stopped = registry.stop("task-42", Duration::from_secs(10)).await;
//! assert!(stopped);
//! assert_eq!(registry.count(), 0);
//! # }
//! ```
//!
//! ## Error Model
//!
//! Lifecycle operations never return OS errors. "Not tracked" and "already
//! exited" are ordinary results, and signal-delivery failures are logged with
//! the process id and attempted action before being reported as `false` /
//! not counted. [`Result`] is only used for configuration, logging setup and
//! signal installation.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod manager;
pub mod orphan;
pub mod process;
mod result;
pub mod shutdown;

pub use config::LifecycleConfig;
pub use core::ProcessId;
pub use error::{Error, HandleError, ProcessTableError};
pub use manager::LifecycleManager;
pub use orphan::{OrphanScanner, OwnershipSignature, ProcessInfo, ProcessTable, SystemProcessTable};
pub use process::{
    ChildHandle, EscalationPolicy, FailedStage, ProcessHandle, ProcessRegistry, StopSummary,
    TermSignal, Termination, TrackedProcess, terminate,
};
pub use result::Result;
pub use shutdown::{ShutdownFlag, ShutdownOutcome, ShutdownSignal, SignalCoordinator};

#[cfg(unix)]
pub use process::PidHandle;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        EscalationPolicy, LifecycleConfig, LifecycleManager, ProcessHandle, ProcessId,
        ProcessRegistry, Result, ShutdownFlag, Termination,
    };
}
