//! The lifecycle state object handed to every collaborator at startup.

use crate::Result;
use crate::config::LifecycleConfig;
use crate::orphan::{OrphanScanner, ProcessTable, SystemProcessTable};
use crate::process::ProcessRegistry;
use crate::shutdown::{ShutdownFlag, ShutdownSignal, SignalCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Owns the registry, the shutdown flag, the orphan scanner and the signal
/// coordinator, all built from one [`LifecycleConfig`].
///
/// # Examples
///
/// ```rust,no_run
/// use orchestra_lifecycle::{LifecycleConfig, LifecycleManager};
///
/// # #[tokio::main]
/// # async fn main() -> orchestra_lifecycle::Result<()> {
/// let manager = LifecycleManager::new(LifecycleConfig::load()?);
/// manager.install_signal_handlers()?;
/// let _sweeper = manager.spawn_orphan_sweeper(std::env::current_dir().ok());
///
/// let child = tokio::process::Command::new("sleep")
///     .arg("60")
///     .spawn()
///     .expect("failed to spawn");
/// manager.registry().track_child("worker-1", child);
/// manager.registry().stop("worker-1", manager.config().termination.stop_timeout()).await;
///
/// manager.cleanup().await;
/// # Ok(())
/// # }
/// ```
pub struct LifecycleManager {
    config: LifecycleConfig,
    registry: ProcessRegistry,
    flag: ShutdownFlag,
    scanner: Arc<OrphanScanner>,
    coordinator: SignalCoordinator,
}

impl LifecycleManager {
    /// Build against the host process table.
    pub fn new(config: LifecycleConfig) -> Self {
        Self::with_process_table(config, Arc::new(SystemProcessTable::new()))
    }

    /// Build against a custom process table.
    pub fn with_process_table(config: LifecycleConfig, table: Arc<dyn ProcessTable>) -> Self {
        let registry = ProcessRegistry::with_kill_timeout(config.termination.kill_timeout());
        let flag = ShutdownFlag::new();
        let scanner = Arc::new(OrphanScanner::new(
            registry.clone(),
            table,
            config.orphans.resolved_signatures(),
            config.orphans.policy(),
        ));
        let coordinator = SignalCoordinator::new(
            registry.clone(),
            flag.clone(),
            config.termination.shutdown_timeout(),
        )
        .with_exit_code(config.termination.exit_code);

        Self {
            config,
            registry,
            flag,
            scanner,
            coordinator,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    pub fn scanner(&self) -> &Arc<OrphanScanner> {
        &self.scanner
    }

    pub fn coordinator(&self) -> &SignalCoordinator {
        &self.coordinator
    }

    /// Install SIGTERM and SIGINT handlers that drain the registry and exit.
    pub fn install_signal_handlers(&self) -> Result<JoinHandle<()>> {
        self.coordinator.install(&ShutdownSignal::DEFAULT)
    }

    /// Start the periodic orphan sweep, unless disabled in config.
    pub fn spawn_orphan_sweeper(&self, project_path: Option<PathBuf>) -> Option<JoinHandle<()>> {
        if !self.config.orphans.enabled {
            debug!("orphan sweeper disabled by configuration");
            return None;
        }

        let interval = self.config.orphans.sweep_interval();
        info!(?interval, ?project_path, "starting orphan sweeper");
        Some(
            self.scanner
                .clone()
                .spawn_periodic(interval, project_path, self.flag.clone()),
        )
    }

    /// Exit-time cleanup: stop every tracked process, then sweep once for
    /// orphans across all projects.
    ///
    /// Sets the shutdown flag, so the periodic sweeper stops as well.
    pub async fn cleanup(&self) -> usize {
        self.flag.trigger();

        let summary = self
            .registry
            .stop_all(self.config.termination.shutdown_timeout())
            .await;

        let reaped = if self.config.orphans.enabled {
            self.scanner.find_and_reap_orphans(None, false).await
        } else {
            0
        };

        info!(
            stopped = summary.stopped,
            failed = summary.failed,
            reaped,
            "lifecycle cleanup complete"
        );
        summary.stopped + reaped
    }
}
