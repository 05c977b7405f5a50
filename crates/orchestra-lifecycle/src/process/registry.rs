//! Process registry implementation for tracking the processes an orchestrator spawned.
//!
//! This module provides [`ProcessRegistry`] and [`TrackedProcess`]: a thread-safe map
//! from a caller-chosen [`ProcessId`] to a process handle, plus a PID membership set
//! the orphan scanner consults to avoid reaping processes that are still tracked.

use super::handle::{ChildHandle, ProcessHandle, membership_pid};
use super::terminator::{DEFAULT_KILL_TIMEOUT, EscalationPolicy, terminate};
use crate::core::ProcessId;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// A process entry owned by the registry.
///
/// Created by [`ProcessRegistry::track`], destroyed by [`ProcessRegistry::untrack`]
/// or by a successful [`ProcessRegistry::stop`].
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    /// Logical key the process was tracked under
    pub process_id: ProcessId,

    /// Handle to the OS process
    pub handle: Arc<dyn ProcessHandle>,

    /// PID at tracking time (`None` when the handle had no valid PID)
    pub pid: Option<u32>,

    /// When the entry was created
    pub tracked_at: DateTime<Utc>,

    /// Distinguishes this entry from later re-tracks of the same id
    generation: u64,

    /// Serialises concurrent `stop()` calls on this entry
    stop_guard: Arc<tokio::sync::Mutex<()>>,
}

impl TrackedProcess {
    /// Time since the entry was tracked.
    pub fn tracked_for(&self) -> chrono::Duration {
        Utc::now() - self.tracked_at
    }
}

/// Outcome of [`ProcessRegistry::stop_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopSummary {
    /// Entries confirmed stopped (or already gone)
    pub stopped: usize,
    /// Entries whose stop attempt failed; they remain tracked
    pub failed: usize,
}

/// Map and membership set, only ever touched through the registry lock.
///
/// These are the lock-free cores of the public operations. They take
/// `&mut self`, so they can only be reached through an already-held guard,
/// and they never call back into [`ProcessRegistry`].
#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<ProcessId, TrackedProcess>,
    /// PID -> number of entries holding it
    pids: HashMap<u32, usize>,
}

impl RegistryState {
    fn insert(&mut self, entry: TrackedProcess) -> Option<TrackedProcess> {
        let superseded = self.remove(entry.process_id.as_str());
        if let Some(pid) = membership_pid(entry.pid) {
            *self.pids.entry(pid).or_insert(0) += 1;
        }
        self.entries.insert(entry.process_id.clone(), entry);
        superseded
    }

    fn remove(&mut self, process_id: &str) -> Option<TrackedProcess> {
        let entry = self.entries.remove(process_id)?;
        self.release_pid(entry.pid);
        Some(entry)
    }

    fn remove_generation(&mut self, process_id: &str, generation: u64) -> Option<TrackedProcess> {
        if self.generation_of(process_id) != Some(generation) {
            return None;
        }
        self.remove(process_id)
    }

    fn generation_of(&self, process_id: &str) -> Option<u64> {
        self.entries.get(process_id).map(|entry| entry.generation)
    }

    fn release_pid(&mut self, pid: Option<u32>) {
        let Some(pid) = membership_pid(pid) else {
            return;
        };
        if let Some(count) = self.pids.get_mut(&pid) {
            *count -= 1;
            if *count == 0 {
                self.pids.remove(&pid);
            }
        }
    }
}

/// Thread-safe registry for tracking spawned processes.
///
/// # Thread Safety
///
/// One mutex guards both the id map and the PID membership set, so every
/// check-then-act sequence is atomic and no observer ever sees one updated
/// without the other. The lock is never held across an `.await` or while
/// calling into a process handle; handles are queried on a cloned `Arc`.
///
/// Cloning the registry is cheap and yields another view of the same state.
///
/// # Examples
///
/// ```rust,no_run
/// use orchestra_lifecycle::process::ProcessRegistry;
/// use std::time::Duration;
/// use tokio::process::Command;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = ProcessRegistry::new();
///
///     let child = Command::new("claude").arg("--dangerously-skip-permissions").spawn()?;
///     registry.track_child("project-alpha", child);
///
///     assert!(registry.is_running("project-alpha"));
///     println!("Tracking {} processes", registry.count());
///
///     let stopped = registry.stop("project-alpha", Duration::from_secs(10)).await;
///     assert!(stopped);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_generation: Arc<AtomicU64>,
    kill_timeout: Duration,
}

impl ProcessRegistry {
    /// Create an empty registry with the default forced-kill wait.
    pub fn new() -> Self {
        Self::with_kill_timeout(DEFAULT_KILL_TIMEOUT)
    }

    /// Create an empty registry whose `stop()` waits `kill_timeout` after a forced kill.
    pub fn with_kill_timeout(kill_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            next_generation: Arc::new(AtomicU64::new(0)),
            kill_timeout,
        }
    }

    /// Wait applied after the forced kill in [`stop`](Self::stop).
    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }

    /// Track a process under `process_id`.
    ///
    /// Always succeeds. An existing entry for the same id is replaced and its
    /// PID leaves the membership set in the same critical section. A handle
    /// without a valid PID is stored for lookup but is not a PID member.
    pub fn track(&self, process_id: impl Into<ProcessId>, handle: Arc<dyn ProcessHandle>) {
        let process_id = process_id.into();
        let pid = handle.pid();
        let entry = TrackedProcess {
            process_id: process_id.clone(),
            handle,
            pid,
            tracked_at: Utc::now(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            stop_guard: Arc::new(tokio::sync::Mutex::new(())),
        };

        let superseded = self.state.lock().insert(entry);

        match superseded {
            Some(old) => info!(
                process_id = %process_id,
                ?pid,
                old_pid = ?old.pid,
                "replaced tracked process"
            ),
            None => info!(process_id = %process_id, ?pid, "tracking process"),
        }
        if membership_pid(pid).is_none() {
            warn!(process_id = %process_id, "tracked handle has no PID; it is excluded from orphan protection");
        }
    }

    /// Track a freshly spawned tokio child and return its handle.
    pub fn track_child(&self, process_id: impl Into<ProcessId>, child: Child) -> Arc<ChildHandle> {
        let handle = Arc::new(ChildHandle::new(child));
        self.track(process_id, handle.clone());
        handle
    }

    /// Stop tracking `process_id` without signalling it.
    ///
    /// Idempotent: a missing id is a no-op returning `None`.
    pub fn untrack(&self, process_id: impl AsRef<str>) -> Option<TrackedProcess> {
        let process_id = process_id.as_ref();
        let removed = self.state.lock().remove(process_id);
        if removed.is_some() {
            info!(process_id, "stopped tracking process");
        }
        removed
    }

    /// Handle tracked under `process_id`, if any.
    pub fn get(&self, process_id: impl AsRef<str>) -> Option<Arc<dyn ProcessHandle>> {
        self.state
            .lock()
            .entries
            .get(process_id.as_ref())
            .map(|entry| entry.handle.clone())
    }

    /// Full entry tracked under `process_id`, if any.
    pub fn entry(&self, process_id: impl AsRef<str>) -> Option<TrackedProcess> {
        self.state.lock().entries.get(process_id.as_ref()).cloned()
    }

    /// Whether the process tracked under `process_id` is alive right now.
    ///
    /// Polls the OS every time; an absent id or a failed poll is `false`.
    pub fn is_running(&self, process_id: impl AsRef<str>) -> bool {
        let process_id = process_id.as_ref();
        let Some(handle) = self.get(process_id) else {
            return false;
        };
        match handle.try_wait() {
            Ok(exited) => !exited,
            Err(e) => {
                warn!(process_id, error = %e, "exit poll failed, reporting not running");
                false
            }
        }
    }

    /// Snapshot of the tracked ids.
    pub fn list_tracked_ids(&self) -> Vec<ProcessId> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Number of tracked entries.
    pub fn count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether `pid` belongs to any tracked entry.
    pub fn contains_pid(&self, pid: u32) -> bool {
        self.state.lock().pids.contains_key(&pid)
    }

    /// Snapshot of the PID membership set.
    pub fn tracked_pids(&self) -> HashSet<u32> {
        self.state.lock().pids.keys().copied().collect()
    }

    /// Stop the process tracked under `process_id`.
    ///
    /// Returns `true` when the process is confirmed stopped or there was
    /// nothing to stop, `false` when the attempt failed. A failed entry stays
    /// tracked. A zero `timeout` skips the graceful wait and escalates to a
    /// forced kill immediately.
    ///
    /// Concurrent calls for the same id serialise: the first performs the
    /// escalation, the others then find the entry gone and return `true`
    /// without signalling.
    pub async fn stop(&self, process_id: impl AsRef<str>, timeout: Duration) -> bool {
        let process_id = process_id.as_ref();

        loop {
            let Some(entry) = self.entry(process_id) else {
                debug!(process_id, "stop requested for untracked process, nothing to do");
                return true;
            };

            let _guard = entry.stop_guard.lock().await;
            let current = self.state.lock().generation_of(process_id);
            match current {
                Some(generation) if generation == entry.generation => {}
                Some(_) => continue, // re-tracked while we waited
                None => {
                    debug!(process_id, "process was stopped concurrently");
                    return true;
                }
            }

            let policy = EscalationPolicy {
                grace: timeout,
                kill_wait: self.kill_timeout,
            };
            let outcome = terminate(entry.handle.as_ref(), &policy, process_id).await;

            if outcome.is_stopped() {
                self.state.lock().remove_generation(process_id, entry.generation);
                info!(process_id, ?outcome, "process stopped");
                return true;
            }

            warn!(process_id, ?outcome, "stop failed; process left tracked");
            return false;
        }
    }

    /// Stop every tracked process, best-effort.
    ///
    /// Operates on a snapshot of the ids; one failure does not prevent the others.
    pub async fn stop_all(&self, timeout: Duration) -> StopSummary {
        let ids = self.list_tracked_ids();
        info!(count = ids.len(), "stopping all tracked processes");

        let results = join_all(ids.iter().map(|id| self.stop(id, timeout))).await;
        let stopped = results.iter().filter(|&&ok| ok).count();
        let summary = StopSummary {
            stopped,
            failed: results.len() - stopped,
        };

        info!(stopped = summary.stopped, failed = summary.failed, "finished stopping tracked processes");
        summary
    }

    /// Drop entries whose process has already exited.
    ///
    /// Returns the number of entries removed. An entry re-tracked while this
    /// runs is left alone.
    pub fn reap_exited(&self) -> usize {
        let snapshot: Vec<TrackedProcess> = self.state.lock().entries.values().cloned().collect();

        let exited: Vec<&TrackedProcess> = snapshot
            .iter()
            .filter(|entry| matches!(entry.handle.try_wait(), Ok(true)))
            .collect();
        if exited.is_empty() {
            return 0;
        }

        let mut state = self.state.lock();
        let removed = exited
            .into_iter()
            .filter(|entry| {
                state
                    .remove_generation(entry.process_id.as_str(), entry.generation)
                    .is_some()
            })
            .count();
        drop(state);

        debug!(removed, "removed exited processes from registry");
        removed
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
