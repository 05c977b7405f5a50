//! Signal-triggered shutdown.
//!
//! SIGTERM / SIGINT drain the registry by calling
//! [`ProcessRegistry::stop`] on every tracked entry, then exit the process.
//! The drain runs at most once: the [`ShutdownFlag`] is flipped with a single
//! atomic operation before anything else happens, and any signal arriving
//! after that is ignored.
//!
//! The flag is independent of the registry lock. The drain goes through the
//! registry's public operations like any other caller.

use crate::Result;
use crate::error::Error;
use crate::process::{ProcessRegistry, StopSummary};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct FlagInner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Process-wide "shutdown has begun" flag, set exactly once.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<FlagInner>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the caller that set it.
    pub fn trigger(&self) -> bool {
        let won = self
            .inner
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    pub fn is_set(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the flag is set.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// Signals that trigger shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    /// SIGTERM
    Terminate,
    /// SIGINT / Ctrl+C
    Interrupt,
}

impl ShutdownSignal {
    /// The signals installed by default.
    pub const DEFAULT: [ShutdownSignal; 2] = [Self::Terminate, Self::Interrupt];

    pub fn name(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
        }
    }
}

/// Result of handling one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Another signal already started shutdown; nothing was done.
    AlreadyInProgress,
    /// This signal drained the registry.
    Drained(StopSummary),
}

/// Turns OS signals into a single registry drain.
#[derive(Debug, Clone)]
pub struct SignalCoordinator {
    registry: ProcessRegistry,
    flag: ShutdownFlag,
    timeout: Duration,
    exit_code: i32,
}

impl SignalCoordinator {
    /// `timeout` is the grace period handed to each `stop` during the drain.
    pub fn new(registry: ProcessRegistry, flag: ShutdownFlag, timeout: Duration) -> Self {
        Self {
            registry,
            flag,
            timeout,
            exit_code: 0,
        }
    }

    /// Exit status used after a signal-triggered drain.
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    /// Handle one received signal without exiting.
    ///
    /// The first call drains the registry; every later call returns
    /// [`ShutdownOutcome::AlreadyInProgress`] immediately.
    pub async fn on_signal(&self, signal: ShutdownSignal) -> ShutdownOutcome {
        if !self.flag.trigger() {
            debug!(signal = signal.name(), "shutdown already in progress, ignoring signal");
            return ShutdownOutcome::AlreadyInProgress;
        }

        warn!(
            signal = signal.name(),
            tracked = self.registry.count(),
            "received shutdown signal, stopping tracked processes"
        );
        let summary = self.registry.stop_all(self.timeout).await;

        if summary.failed > 0 {
            warn!(failed = summary.failed, "some processes could not be stopped during shutdown");
        }
        info!(stopped = summary.stopped, "shutdown drain complete");
        ShutdownOutcome::Drained(summary)
    }

    /// Register listeners for `signals` and spawn the task that handles them.
    ///
    /// Must be called from within a tokio runtime. Registration failures are
    /// returned; once installed, the first signal drains the registry and
    /// exits the process with the configured exit code.
    pub fn install(&self, signals: &[ShutdownSignal]) -> Result<JoinHandle<()>> {
        let mut stream = listen(signals)?;
        let coordinator = self.clone();

        info!(signals = ?signals, "installed shutdown signal handlers");

        Ok(tokio::spawn(async move {
            use futures::StreamExt;

            while let Some(signal) = stream.next().await {
                match coordinator.on_signal(signal).await {
                    ShutdownOutcome::AlreadyInProgress => continue,
                    ShutdownOutcome::Drained(_) => {
                        info!(exit_code = coordinator.exit_code, "exiting after shutdown");
                        std::process::exit(coordinator.exit_code);
                    }
                }
            }
        }))
    }
}

type SignalStream = futures::stream::BoxStream<'static, ShutdownSignal>;

#[cfg(unix)]
fn listen(signals: &[ShutdownSignal]) -> Result<SignalStream> {
    use futures::StreamExt;
    use tokio::signal::unix::{SignalKind, signal};
    use tokio_stream::wrappers::SignalStream as UnixSignalStream;

    let mut streams = Vec::with_capacity(signals.len());
    for &kind in signals {
        let os_kind = match kind {
            ShutdownSignal::Terminate => SignalKind::terminate(),
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
        };
        let listener = signal(os_kind).map_err(Error::Signal)?;
        streams.push(UnixSignalStream::new(listener).map(move |()| kind).boxed());
    }

    Ok(futures::stream::select_all(streams).boxed())
}

#[cfg(not(unix))]
fn listen(signals: &[ShutdownSignal]) -> Result<SignalStream> {
    use futures::StreamExt;

    if signals.contains(&ShutdownSignal::Terminate) {
        warn!("SIGTERM is not available on this platform, listening for Ctrl+C only");
    }

    let ctrl_c = futures::stream::unfold((), |()| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some((ShutdownSignal::Interrupt, ())),
            Err(e) => {
                warn!(error = %e, "Ctrl+C listener failed");
                None
            }
        }
    });
    Ok(ctrl_c.boxed())
}
