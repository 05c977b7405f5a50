//! Process handles: the capability the lifecycle core needs from a spawned process.
//!
//! Anything that can report a PID, poll for exit without blocking, receive a
//! termination signal and wait for exit with a bound can be tracked. Two
//! implementations ship with the crate:
//!
//! - [`ChildHandle`] wraps a `tokio::process::Child` this orchestrator spawned.
//! - [`PidHandle`] (unix) addresses an arbitrary PID, used for orphans found in
//!   the process table that have no `Child` behind them.

use crate::error::HandleError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::Instant;

/// Result type for handle operations.
pub type HandleResult<T> = std::result::Result<T, HandleError>;

/// Interval between exit polls in the default [`ProcessHandle::wait_timeout`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Termination signals used by the escalation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermSignal {
    /// Cooperative request to exit (SIGTERM). The target may intercept it.
    Graceful,
    /// Unconditional kill (SIGKILL). Cannot be intercepted.
    Kill,
}

impl TermSignal {
    /// Conventional signal name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Graceful => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn as_nix(self) -> nix::sys::signal::Signal {
        match self {
            Self::Graceful => nix::sys::signal::Signal::SIGTERM,
            Self::Kill => nix::sys::signal::Signal::SIGKILL,
        }
    }
}

impl fmt::Display for TermSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability interface over an OS process.
///
/// Implementations must be cheap to query and safe to call concurrently; the
/// registry calls them without holding its own lock.
#[async_trait]
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// OS process identifier, if the process has one.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit poll. `Ok(true)` means the process has exited.
    fn try_wait(&self) -> HandleResult<bool>;

    /// Deliver a termination signal.
    fn send_signal(&self, signal: TermSignal) -> HandleResult<()>;

    /// Wait up to `timeout` for the process to exit. `Ok(true)` means it exited.
    ///
    /// The default implementation polls [`try_wait`](Self::try_wait) every
    /// [`POLL_INTERVAL`].
    async fn wait_timeout(&self, timeout: Duration) -> HandleResult<bool> {
        let deadline = deadline_after(timeout);
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep((deadline - now).min(POLL_INTERVAL)).await;
        }
    }
}

/// `now + timeout`, saturating for absurdly long timeouts.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// PID as stored in the membership set: zero is treated as "no PID".
pub(crate) fn membership_pid(pid: Option<u32>) -> Option<u32> {
    pid.filter(|&pid| pid != 0)
}

#[cfg(unix)]
fn nix_pid(pid: u32) -> HandleResult<nix::unistd::Pid> {
    // kill(0, ..) and negative PIDs address process groups
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(nix::unistd::Pid::from_raw(raw)),
        _ => Err(HandleError::InvalidPid { pid }),
    }
}

#[cfg(unix)]
fn signal_error(pid: u32, signal: &'static str, errno: nix::errno::Errno) -> HandleError {
    use nix::errno::Errno;

    match errno {
        Errno::ESRCH => HandleError::NoSuchProcess { pid },
        Errno::EPERM => HandleError::PermissionDenied { pid },
        other => HandleError::Signal {
            pid,
            signal,
            reason: other.desc().to_string(),
        },
    }
}

#[cfg(unix)]
fn deliver(pid: u32, signal: TermSignal) -> HandleResult<()> {
    let target = nix_pid(pid)?;
    nix::sys::signal::kill(target, signal.as_nix())
        .map_err(|errno| signal_error(pid, signal.name(), errno))
}

/// Handle over a child process spawned by this orchestrator.
///
/// # Examples
///
/// ```rust,no_run
/// use orchestra_lifecycle::process::{ChildHandle, ProcessHandle};
/// use tokio::process::Command;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let child = Command::new("sleep").arg("30").spawn()?;
/// let handle = ChildHandle::new(child);
/// assert!(!handle.try_wait()?);
/// # Ok(())
/// # }
/// ```
pub struct ChildHandle {
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl ChildHandle {
    /// Wrap a spawned child. The PID is captured now, because tokio forgets it
    /// once the child has been reaped.
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle").field("pid", &self.pid).finish()
    }
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_wait(&self) -> HandleResult<bool> {
        Ok(self.child.lock().try_wait()?.is_some())
    }

    fn send_signal(&self, signal: TermSignal) -> HandleResult<()> {
        // Holding the lock keeps the child from being reaped (and its PID
        // recycled) between the liveness check and delivery.
        let mut child = self.child.lock();
        if child.try_wait()?.is_some() {
            return Err(HandleError::NoSuchProcess {
                pid: self.pid.unwrap_or_default(),
            });
        }

        match signal {
            TermSignal::Kill => child.start_kill().map_err(HandleError::from),
            TermSignal::Graceful => {
                #[cfg(unix)]
                let delivered = deliver(self.pid.ok_or(HandleError::NoPid)?, signal);
                #[cfg(not(unix))]
                let delivered = child.start_kill().map_err(HandleError::from);
                delivered
            }
        }
    }
}

/// Handle over an arbitrary PID that this process did not spawn.
///
/// Liveness is probed with the null signal: `ESRCH` means the process is
/// gone, `EPERM` means it exists but belongs to another user.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidHandle {
    pid: u32,
}

#[cfg(unix)]
impl PidHandle {
    /// Create a handle, rejecting PIDs that would address a process group.
    pub fn new(pid: u32) -> HandleResult<Self> {
        nix_pid(pid)?;
        Ok(Self { pid })
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessHandle for PidHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&self) -> HandleResult<bool> {
        use nix::errno::Errno;

        match nix::sys::signal::kill(nix_pid(self.pid)?, None) {
            Ok(()) => Ok(false),
            Err(Errno::ESRCH) => Ok(true),
            Err(Errno::EPERM) => Ok(false),
            Err(errno) => Err(signal_error(self.pid, "null signal", errno)),
        }
    }

    fn send_signal(&self, signal: TermSignal) -> HandleResult<()> {
        deliver(self.pid, signal)
    }
}
