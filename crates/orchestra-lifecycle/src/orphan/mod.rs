//! Orphan detection and reaping.
//!
//! An orphan is a running process that carries this orchestrator's ownership
//! signature (the Claude CLI it launches, or its own re-exec) but that no
//! registry entry accounts for. Orphans are typically left behind when a
//! previous orchestrator instance crashed before it could clean up.
//!
//! The scanner reads the process table through the [`ProcessTable`]
//! capability so it stays platform-agnostic; [`SystemProcessTable`] is the
//! real implementation.

mod system;

pub use system::SystemProcessTable;

use crate::error::ProcessTableError;
use crate::process::{EscalationPolicy, HandleResult, ProcessHandle, ProcessRegistry, terminate};
use crate::shutdown::ShutdownFlag;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One row of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process identifier
    pub pid: u32,
    /// Executable name as reported by the OS
    pub name: String,
    /// Space-joined argv; `None` when it could not be read
    pub command_line: Option<String>,
}

impl ProcessInfo {
    /// Build a row from a name and argv.
    pub fn new(pid: u32, name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            command_line: Some(command_line.into()),
        }
    }

    /// First three arguments, for log lines.
    pub fn command_preview(&self) -> String {
        self.command_line
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// OS process-table capability.
pub trait ProcessTable: Send + Sync {
    /// Take one snapshot of the running processes.
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError>;

    /// Obtain a handle able to signal `pid`.
    fn attach(&self, pid: u32) -> HandleResult<Arc<dyn ProcessHandle>>;
}

/// Command-line pattern identifying processes this orchestrator launched.
///
/// `program` is matched case-insensitively against the process name or argv[0];
/// every entry of `markers` must appear verbatim in the command line. A
/// signature with neither matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipSignature {
    /// Name used in logs
    pub label: String,
    /// Program name fragment
    #[serde(default)]
    pub program: Option<String>,
    /// Substrings that must all be present
    #[serde(default)]
    pub markers: Vec<String>,
}

impl OwnershipSignature {
    /// The Claude CLI as launched by the orchestrator.
    pub fn claude_cli() -> Self {
        Self {
            label: "claude-cli".to_string(),
            program: Some("claude".to_string()),
            markers: vec!["--dangerously".to_string()],
        }
    }

    /// The orchestrator's own re-exec, recognised by `marker` in its command line.
    pub fn orchestrator(marker: impl Into<String>) -> Self {
        Self {
            label: "orchestrator".to_string(),
            program: None,
            markers: vec![marker.into()],
        }
    }

    /// Default signatures: the Claude CLI, plus the current executable's re-exec
    /// when `orchestrator_marker` is not given explicitly.
    pub fn defaults(orchestrator_marker: Option<&str>) -> Vec<Self> {
        let marker = orchestrator_marker.map(str::to_string).or_else(current_exe_name);
        let mut signatures = vec![Self::claude_cli()];
        signatures.extend(marker.map(Self::orchestrator));
        signatures
    }

    /// Whether `process` carries this signature.
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        let Some(command_line) = process.command_line.as_deref() else {
            return false;
        };
        if command_line.trim().is_empty() || (self.program.is_none() && self.markers.is_empty()) {
            return false;
        }

        if let Some(program) = &self.program {
            let program = program.to_lowercase();
            let argv0 = command_line.split_whitespace().next().unwrap_or_default();
            if !process.name.to_lowercase().contains(&program)
                && !argv0.to_lowercase().contains(&program)
            {
                return false;
            }
        }

        self.markers
            .iter()
            .all(|marker| command_line.contains(marker.as_str()))
    }
}

fn current_exe_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// Finds and terminates orphaned processes.
///
/// # Examples
///
/// ```rust,no_run
/// use orchestra_lifecycle::orphan::{OrphanScanner, OwnershipSignature, SystemProcessTable};
/// use orchestra_lifecycle::process::{EscalationPolicy, ProcessRegistry};
/// use std::path::Path;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = ProcessRegistry::new();
/// let scanner = OrphanScanner::new(
///     registry.clone(),
///     Arc::new(SystemProcessTable::new()),
///     OwnershipSignature::defaults(None),
///     EscalationPolicy::with_grace(Duration::from_secs(5)),
/// );
///
/// let reaped = scanner.find_and_reap_orphans(Some(Path::new("/srv/project")), false).await;
/// println!("Reaped {} orphans", reaped);
/// # }
/// ```
pub struct OrphanScanner {
    registry: ProcessRegistry,
    table: Arc<dyn ProcessTable>,
    signatures: Vec<OwnershipSignature>,
    policy: EscalationPolicy,
    protected_pids: HashSet<u32>,
}

impl OrphanScanner {
    /// Create a scanner. The current process and its parent are never reaped.
    pub fn new(
        registry: ProcessRegistry,
        table: Arc<dyn ProcessTable>,
        signatures: Vec<OwnershipSignature>,
        policy: EscalationPolicy,
    ) -> Self {
        let mut protected_pids = HashSet::from([std::process::id()]);
        #[cfg(unix)]
        protected_pids.insert(std::os::unix::process::parent_id());

        Self {
            registry,
            table,
            signatures,
            policy,
            protected_pids,
        }
    }

    /// Never reap `pid`, even if it looks orphaned.
    pub fn protect_pid(&mut self, pid: u32) {
        self.protected_pids.insert(pid);
    }

    /// Signatures this scanner matches against.
    pub fn signatures(&self) -> &[OwnershipSignature] {
        &self.signatures
    }

    /// Filter a snapshot down to orphan candidates.
    ///
    /// `tracked` is the registry's PID membership set at sweep start.
    pub fn candidates(
        &self,
        processes: Vec<ProcessInfo>,
        tracked: &HashSet<u32>,
        project_path: Option<&Path>,
    ) -> Vec<ProcessInfo> {
        let project = project_path.map(|path| path.to_string_lossy().into_owned());

        processes
            .into_iter()
            .filter(|process| self.signatures.iter().any(|sig| sig.matches(process)))
            .filter(|process| !self.protected_pids.contains(&process.pid))
            .filter(|process| !tracked.contains(&process.pid))
            .filter(|process| match (&project, process.command_line.as_deref()) {
                (Some(project), Some(command_line)) => command_line.contains(project.as_str()),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect()
    }

    /// Sweep the process table once and terminate every orphan found.
    ///
    /// With `project_path`, only processes whose command line references it are
    /// considered. With `force`, orphans are killed without a grace period.
    /// Returns the number of orphans confirmed terminated.
    pub async fn find_and_reap_orphans(&self, project_path: Option<&Path>, force: bool) -> usize {
        let table = self.table.clone();
        let snapshot = match tokio::task::spawn_blocking(move || table.list_processes()).await {
            Ok(Ok(processes)) => processes,
            Ok(Err(e)) => {
                error!(error = %e, "orphan sweep aborted: could not read process table");
                return 0;
            }
            Err(e) => {
                error!(error = %e, "orphan sweep aborted: enumeration task failed");
                return 0;
            }
        };

        let unreadable = snapshot.iter().filter(|p| p.command_line.is_none()).count();
        if unreadable > 0 {
            debug!(unreadable, "skipping processes with unreadable command lines");
        }

        let tracked = self.registry.tracked_pids();
        let candidates = self.candidates(snapshot, &tracked, project_path);
        if candidates.is_empty() {
            debug!(?project_path, "no orphaned processes found");
            return 0;
        }

        let policy = if force {
            EscalationPolicy::immediate(self.policy.kill_wait)
        } else {
            self.policy
        };

        let results = join_all(candidates.iter().map(|candidate| self.reap(candidate, &policy))).await;
        let reaped = results.into_iter().filter(|&reaped| reaped).count();

        if reaped > 0 {
            info!(reaped, ?project_path, "killed orphaned process(es)");
        }
        reaped
    }

    async fn reap(&self, candidate: &ProcessInfo, policy: &EscalationPolicy) -> bool {
        let pid = candidate.pid;
        if self.registry.contains_pid(pid) {
            debug!(pid, "candidate became tracked during sweep, skipping");
            return false;
        }

        let handle = match self.table.attach(pid) {
            Ok(handle) => handle,
            Err(e) if e.is_vanished() => {
                debug!(pid, "orphan exited before termination");
                return true;
            }
            Err(e) => {
                warn!(pid, error = %e, "cannot attach to orphan candidate, skipping");
                return false;
            }
        };

        warn!(pid, command = %candidate.command_preview(), "terminating orphaned process");
        let label = format!("orphan:{pid}");
        terminate(handle.as_ref(), policy, &label).await.is_stopped()
    }

    /// Run a sweep every `interval` until `shutdown` is triggered.
    ///
    /// The first sweep happens one interval after the call, not immediately.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        project_path: Option<PathBuf>,
        shutdown: ShutdownFlag,
    ) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {}
                }
                if shutdown.is_set() {
                    break;
                }

                let reaped = self.find_and_reap_orphans(project_path.as_deref(), false).await;
                if reaped > 0 {
                    info!(reaped, ?project_path, "periodic sweep cleaned up orphaned process(es)");
                }
            }

            debug!("orphan sweeper stopped");
        })
    }
}
