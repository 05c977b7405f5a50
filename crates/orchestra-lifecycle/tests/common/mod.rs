//! Common test utilities for lifecycle tests
//!
//! Scriptable fake processes and a fake process table. Timing is driven by
//! `tokio::time`, so tests can run with a paused clock.

#![allow(dead_code)]

use orchestra_lifecycle::error::{HandleError, ProcessTableError};
use orchestra_lifecycle::orphan::{ProcessInfo, ProcessTable};
use orchestra_lifecycle::process::{HandleResult, ProcessHandle, TermSignal};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a fake reacts to SIGTERM.
#[derive(Debug, Clone, Copy)]
enum OnTerm {
    Exit,
    ExitAfter(Duration),
    Ignore,
}

#[derive(Debug)]
struct FakeState {
    exit_at: Option<Instant>,
    on_term: OnTerm,
    reject_graceful: bool,
    reject_kill: bool,
    unkillable: bool,
    vanish_on_signal: bool,
    signals: Vec<TermSignal>,
}

/// Scriptable process handle that records every delivered signal.
#[derive(Debug)]
pub struct FakeProcess {
    pid: Option<u32>,
    state: Mutex<FakeState>,
}

impl FakeProcess {
    /// Running process that exits as soon as it receives SIGTERM.
    pub fn new(pid: u32) -> Self {
        Self::with_pid(Some(pid))
    }

    pub fn with_pid(pid: Option<u32>) -> Self {
        Self {
            pid,
            state: Mutex::new(FakeState {
                exit_at: None,
                on_term: OnTerm::Exit,
                reject_graceful: false,
                reject_kill: false,
                unkillable: false,
                vanish_on_signal: false,
                signals: Vec::new(),
            }),
        }
    }

    /// Exits on its own `after` from now, whatever it is sent.
    pub fn exits_in(self, after: Duration) -> Self {
        self.state.lock().exit_at = Some(Instant::now() + after);
        self
    }

    /// Has already exited.
    pub fn exited(self) -> Self {
        self.state.lock().exit_at = Some(Instant::now());
        self
    }

    /// Takes `delay` to shut down after SIGTERM.
    pub fn term_delay(self, delay: Duration) -> Self {
        self.state.lock().on_term = OnTerm::ExitAfter(delay);
        self
    }

    /// Traps SIGTERM and keeps running.
    pub fn ignoring_term(self) -> Self {
        self.state.lock().on_term = OnTerm::Ignore;
        self
    }

    /// SIGTERM delivery fails with permission denied.
    pub fn rejecting_graceful(self) -> Self {
        self.state.lock().reject_graceful = true;
        self
    }

    /// SIGKILL delivery fails with permission denied.
    pub fn rejecting_kill(self) -> Self {
        self.state.lock().reject_kill = true;
        self
    }

    /// SIGKILL is delivered but the process never goes away (stuck in D state).
    pub fn unkillable(self) -> Self {
        self.state.lock().unkillable = true;
        self
    }

    /// Looks alive to every poll, then turns out to be gone the moment a
    /// signal is sent (exited between the poll and the signal).
    pub fn vanishing_on_signal(self) -> Self {
        self.state.lock().vanish_on_signal = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Signals delivered so far, in order.
    pub fn signals(&self) -> Vec<TermSignal> {
        self.state.lock().signals.clone()
    }

    pub fn count_of(&self, signal: TermSignal) -> usize {
        self.signals().iter().filter(|&&s| s == signal).count()
    }

    fn has_exited(state: &FakeState) -> bool {
        state.exit_at.is_some_and(|at| Instant::now() >= at)
    }

    fn schedule_exit(state: &mut FakeState, after: Duration) {
        let at = Instant::now() + after;
        state.exit_at = Some(state.exit_at.map_or(at, |current| current.min(at)));
    }
}

#[async_trait::async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_wait(&self) -> HandleResult<bool> {
        Ok(Self::has_exited(&self.state.lock()))
    }

    fn send_signal(&self, signal: TermSignal) -> HandleResult<()> {
        let pid = self.pid.unwrap_or_default();
        let mut state = self.state.lock();

        if state.vanish_on_signal && state.exit_at.is_none() {
            state.exit_at = Some(Instant::now());
        }
        if Self::has_exited(&state) {
            return Err(HandleError::NoSuchProcess { pid });
        }

        match signal {
            TermSignal::Graceful => {
                if state.reject_graceful {
                    return Err(HandleError::PermissionDenied { pid });
                }
                match state.on_term {
                    OnTerm::Exit => Self::schedule_exit(&mut state, Duration::ZERO),
                    OnTerm::ExitAfter(delay) => Self::schedule_exit(&mut state, delay),
                    OnTerm::Ignore => {}
                }
            }
            TermSignal::Kill => {
                if state.reject_kill {
                    return Err(HandleError::PermissionDenied { pid });
                }
                if !state.unkillable {
                    Self::schedule_exit(&mut state, Duration::ZERO);
                }
            }
        }

        state.signals.push(signal);
        Ok(())
    }
}

/// In-memory process table.
#[derive(Default)]
pub struct FakeProcessTable {
    processes: Vec<ProcessInfo>,
    handles: HashMap<u32, Arc<FakeProcess>>,
    attach_errors: HashMap<u32, fn(u32) -> HandleError>,
    fail_enumeration: bool,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row backed by `handle`.
    pub fn with(mut self, pid: u32, name: &str, command_line: &str, handle: Arc<FakeProcess>) -> Self {
        self.processes.push(ProcessInfo::new(pid, name, command_line));
        self.handles.insert(pid, handle);
        self
    }

    /// Add a row whose attach fails with `error`.
    pub fn with_unattachable(
        mut self,
        pid: u32,
        name: &str,
        command_line: &str,
        error: fn(u32) -> HandleError,
    ) -> Self {
        self.processes.push(ProcessInfo::new(pid, name, command_line));
        self.attach_errors.insert(pid, error);
        self
    }

    /// Add a row whose command line cannot be read.
    pub fn with_unreadable(mut self, pid: u32, name: &str) -> Self {
        self.processes.push(ProcessInfo {
            pid,
            name: name.to_string(),
            command_line: None,
        });
        self
    }

    /// Make every enumeration fail.
    pub fn failing(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ProcessTable for FakeProcessTable {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError> {
        if self.fail_enumeration {
            return Err(ProcessTableError::Enumeration("permission denied".to_string()));
        }
        Ok(self.processes.clone())
    }

    fn attach(&self, pid: u32) -> HandleResult<Arc<dyn ProcessHandle>> {
        if let Some(error) = self.attach_errors.get(&pid) {
            return Err(error(pid));
        }
        match self.handles.get(&pid) {
            Some(handle) => Ok(handle.clone()),
            None => Err(HandleError::NoSuchProcess { pid }),
        }
    }
}

/// Command line of an orchestrator-launched Claude CLI working in `project`.
pub fn claude_cmd(project: &str) -> String {
    format!("claude --dangerously-skip-permissions -p task --cwd {project}")
}
