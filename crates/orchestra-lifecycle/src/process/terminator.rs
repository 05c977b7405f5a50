//! Graceful-then-forced termination.
//!
//! ```text
//!            poll ──exited──▶ AlreadyExited
//!              │
//!           SIGTERM ──error──▶ (gone? AlreadyExited : Failed(GracefulSignal))
//!              │
//!     wait(grace) ──exited──▶ Graceful
//!              │ timeout / wait error / zero grace
//!           SIGKILL ──error──▶ (late exit? Forced : Failed(KillSignal))
//!              │
//!   wait(kill_wait) ──exited or wait error──▶ Forced
//!              │ timeout
//!              ▼
//!     Failed(KillWaitTimedOut)
//! ```
//!
//! Every edge is handled inside [`terminate`]; nothing escapes as an error.

use super::handle::{ProcessHandle, TermSignal};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bound on the wait that follows a forced kill.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing for one escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    /// How long the process may take to honour the graceful signal.
    /// Zero skips the wait and escalates straight to the kill.
    pub grace: Duration,
    /// How long to wait for exit after the kill.
    pub kill_wait: Duration,
}

impl EscalationPolicy {
    /// Policy with the given grace period and the default kill wait.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            grace,
            kill_wait: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// Policy that goes straight to the forced kill.
    pub fn immediate(kill_wait: Duration) -> Self {
        Self {
            grace: Duration::ZERO,
            kill_wait,
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::with_grace(Duration::from_secs(10))
    }
}

/// Where a failed escalation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    /// The graceful signal could not be delivered.
    GracefulSignal,
    /// The kill signal could not be delivered and the process is still alive.
    KillSignal,
    /// The kill was delivered but the process did not exit in time.
    KillWaitTimedOut,
}

/// Outcome of [`terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had exited before any signal was sent.
    AlreadyExited,
    /// The process exited after the graceful signal.
    Graceful,
    /// The process was killed.
    Forced,
    /// The process could not be confirmed stopped.
    Failed(FailedStage),
}

impl Termination {
    /// True for every outcome that leaves nothing running.
    pub fn is_stopped(self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Run the escalation protocol against `handle`.
///
/// `label` identifies the target in logs (a process ID or an orphan PID).
pub async fn terminate(
    handle: &dyn ProcessHandle,
    policy: &EscalationPolicy,
    label: &str,
) -> Termination {
    let pid = handle.pid();

    match handle.try_wait() {
        Ok(true) => {
            debug!(process_id = label, ?pid, "process already exited, nothing to signal");
            return Termination::AlreadyExited;
        }
        Ok(false) => {}
        Err(e) => {
            // The signal below settles it: a vanished process fails delivery.
            warn!(process_id = label, ?pid, error = %e, "exit poll failed, proceeding with termination");
        }
    }

    info!(process_id = label, ?pid, grace = ?policy.grace, "sending graceful termination signal");
    if let Err(e) = handle.send_signal(TermSignal::Graceful) {
        if e.is_vanished() || matches!(handle.try_wait(), Ok(true)) {
            info!(process_id = label, ?pid, "process exited before the graceful signal landed");
            return Termination::AlreadyExited;
        }
        error!(
            process_id = label,
            ?pid,
            action = TermSignal::Graceful.name(),
            error = %e,
            "failed to deliver graceful termination signal"
        );
        return Termination::Failed(FailedStage::GracefulSignal);
    }

    if !policy.grace.is_zero() {
        match handle.wait_timeout(policy.grace).await {
            Ok(true) => {
                info!(process_id = label, ?pid, "process terminated gracefully");
                return Termination::Graceful;
            }
            Ok(false) => {
                warn!(process_id = label, ?pid, grace = ?policy.grace, "process ignored graceful signal, force killing");
            }
            Err(e) => {
                warn!(process_id = label, ?pid, error = %e, "graceful wait failed, force killing");
            }
        }
    } else {
        debug!(process_id = label, ?pid, "zero grace period, escalating immediately");
    }

    force_kill(handle, policy.kill_wait, label).await
}

/// The forced branch. The kill call and its wait share this one scope.
async fn force_kill(handle: &dyn ProcessHandle, kill_wait: Duration, label: &str) -> Termination {
    let pid = handle.pid();

    if let Err(e) = handle.send_signal(TermSignal::Kill) {
        if e.is_vanished() || matches!(handle.try_wait(), Ok(true)) {
            info!(process_id = label, ?pid, "process exited before the kill landed");
            return Termination::Forced;
        }
        error!(
            process_id = label,
            ?pid,
            action = TermSignal::Kill.name(),
            error = %e,
            "failed to deliver kill signal"
        );
        return Termination::Failed(FailedStage::KillSignal);
    }

    match handle.wait_timeout(kill_wait).await {
        Ok(true) => {
            info!(process_id = label, ?pid, "process force killed");
            Termination::Forced
        }
        Ok(false) => {
            error!(process_id = label, ?pid, kill_wait = ?kill_wait, "process still running after kill");
            Termination::Failed(FailedStage::KillWaitTimedOut)
        }
        Err(e) => {
            warn!(process_id = label, ?pid, error = %e, "wait after kill failed; kill was delivered");
            Termination::Forced
        }
    }
}
