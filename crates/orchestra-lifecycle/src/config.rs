//! Lifecycle configuration.
//!
//! Loaded from `~/.orchestra/lifecycle.toml` (or `$ORCHESTRA_HOME/lifecycle.toml`),
//! falling back to defaults, then patched from environment variables.
//!
//! ```toml
//! [termination]
//! stop_timeout_secs = 10.0
//! kill_timeout_secs = 5.0
//! shutdown_timeout_secs = 10.0
//! exit_code = 0
//!
//! [orphans]
//! enabled = true
//! grace_secs = 5.0
//! kill_timeout_secs = 5.0
//! sweep_interval_secs = 60.0
//!
//! [[orphans.signatures]]
//! label = "worker"
//! markers = ["worker.py"]
//! ```

use crate::Result;
use crate::error::Error;
use crate::orphan::OwnershipSignature;
use crate::process::EscalationPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the lifecycle configuration inside the home directory.
pub const CONFIG_FILE_NAME: &str = "lifecycle.toml";

/// Upper bound for any configured duration (one year).
const MAX_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Orchestra home directory (`~/.orchestra`), overridable with `ORCHESTRA_HOME`.
///
/// Falls back to the working directory when no home directory can be determined.
pub fn orchestra_home() -> PathBuf {
    if let Ok(home) = std::env::var("ORCHESTRA_HOME") {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orchestra")
}

/// Convert configured seconds to a `Duration`.
///
/// Negative and NaN values become zero, so a bad value degrades to the
/// zero-timeout path instead of failing.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.min(MAX_SECS))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub termination: TerminationConfig,
    pub orphans: OrphanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationConfig {
    /// Grace period for `stop` before escalating to a kill
    pub stop_timeout_secs: f64,
    /// Wait after the kill before reporting failure
    pub kill_timeout_secs: f64,
    /// Per-process grace during shutdown
    pub shutdown_timeout_secs: f64,
    /// Exit status after a signal-triggered shutdown
    pub exit_code: i32,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10.0,
            kill_timeout_secs: 5.0,
            shutdown_timeout_secs: 10.0,
            exit_code: 0,
        }
    }
}

impl TerminationConfig {
    pub fn stop_timeout(&self) -> Duration {
        secs_to_duration(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        secs_to_duration(self.kill_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        secs_to_duration(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrphanConfig {
    /// Run the periodic sweeper
    pub enabled: bool,
    pub grace_secs: f64,
    pub kill_timeout_secs: f64,
    pub sweep_interval_secs: f64,
    /// Command-line marker of the orchestrator's own re-exec.
    /// Defaults to the current executable's file name.
    pub orchestrator_marker: Option<String>,
    /// Extra signatures; an empty list means the built-in defaults
    pub signatures: Vec<OwnershipSignature>,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_secs: 5.0,
            kill_timeout_secs: 5.0,
            sweep_interval_secs: 60.0,
            orchestrator_marker: None,
            signatures: Vec::new(),
        }
    }
}

impl OrphanConfig {
    /// Escalation used when reaping orphans.
    pub fn policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            grace: secs_to_duration(self.grace_secs),
            kill_wait: secs_to_duration(self.kill_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        secs_to_duration(self.sweep_interval_secs)
    }

    /// Signatures to match, resolving the built-in defaults.
    pub fn resolved_signatures(&self) -> Vec<OwnershipSignature> {
        if self.signatures.is_empty() {
            OwnershipSignature::defaults(self.orchestrator_marker.as_deref())
        } else {
            self.signatures.clone()
        }
    }
}

impl LifecycleConfig {
    /// Path of the global config file.
    pub fn global_config_path() -> PathBuf {
        orchestra_home().join(CONFIG_FILE_NAME)
    }

    /// Load the global config (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::global_config_path();
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| Error::config(path, e))?;
        let config: Self = toml::from_str(&contents).map_err(|e| Error::config(path, e))?;

        tracing::info!("Loaded lifecycle config from {:?}", path);
        Ok(config)
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::config(parent, e))?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| Error::config(path, e))?;
        std::fs::write(path, contents).map_err(|e| Error::config(path, e))?;

        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Apply `ORCHESTRA_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_secs("ORCHESTRA_STOP_TIMEOUT") {
            self.termination.stop_timeout_secs = secs;
        }

        if let Some(secs) = env_secs("ORCHESTRA_KILL_TIMEOUT") {
            self.termination.kill_timeout_secs = secs;
            self.orphans.kill_timeout_secs = secs;
        }

        if let Some(secs) = env_secs("ORCHESTRA_SWEEP_INTERVAL") {
            self.orphans.sweep_interval_secs = secs;
        }

        if let Ok(value) = std::env::var("ORCHESTRA_ORPHAN_SWEEP") {
            self.orphans.enabled = !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }

        tracing::debug!("Applied environment variable overrides to config");
    }
}

fn env_secs(name: &str) -> Option<f64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<f64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number of seconds", name, value);
            None
        }
    }
}
