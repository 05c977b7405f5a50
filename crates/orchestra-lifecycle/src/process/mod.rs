//! Process tracking and termination.
//!
//! This module provides the thread-safe [`ProcessRegistry`] that maps caller-chosen
//! ids to spawned processes, the [`ProcessHandle`] capability those processes are
//! accessed through, and the graceful-then-forced [`terminate`] escalation that both
//! the registry and the orphan scanner use.
//!
//! # Features
//!
//! - **Atomic Tracking**: id map and PID membership set change together under one lock
//! - **Live Status**: `is_running` polls the OS, never a cached status
//! - **Escalating Stop**: SIGTERM, bounded wait, SIGKILL, bounded wait; no error escapes
//! - **Idempotent Stop**: concurrent or repeated stops signal exactly once
//!
//! # Examples
//!
//! ```rust,no_run
//! use orchestra_lifecycle::process::ProcessRegistry;
//! use std::time::Duration;
//! use tokio::process::Command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProcessRegistry::new();
//!
//!     let child = Command::new("claude").arg("--dangerously-skip-permissions").spawn()?;
//!     registry.track_child("project-alpha", child);
//!
//!     println!("Tracked: {:?}", registry.list_tracked_ids());
//!
//!     // Ten seconds of grace, then a forced kill
//!     registry.stop("project-alpha", Duration::from_secs(10)).await;
//!
//!     Ok(())
//! }
//! ```

pub mod handle;
pub mod registry;
pub mod terminator;

#[cfg(unix)]
pub use handle::PidHandle;
pub use handle::{ChildHandle, HandleResult, ProcessHandle, TermSignal};
pub use registry::{ProcessRegistry, StopSummary, TrackedProcess};
pub use terminator::{EscalationPolicy, FailedStage, Termination, terminate};
