//! Process-table enumeration backed by `sysinfo`.

use super::{ProcessInfo, ProcessTable};
use crate::error::{HandleError, ProcessTableError};
use crate::process::{HandleResult, ProcessHandle};
use std::ffi::OsStr;
use std::sync::Arc;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// The host's process table.
///
/// Each [`list_processes`](ProcessTable::list_processes) call takes one fresh
/// snapshot; nothing is cached between sweeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    /// Create a handle on the host process table.
    pub fn new() -> Self {
        Self
    }
}

fn lossy<S: AsRef<OsStr> + ?Sized>(value: &S) -> String {
    value.as_ref().to_string_lossy().into_owned()
}

impl ProcessTable for SystemProcessTable {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>, ProcessTableError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProcessTableError::Enumeration(
                "process enumeration is not supported on this platform".to_string(),
            ));
        }

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );

        let processes = system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let argv: Vec<String> = process.cmd().iter().map(|arg| lossy(arg)).collect();
                ProcessInfo {
                    pid: pid.as_u32(),
                    name: lossy(process.name()),
                    command_line: (!argv.is_empty()).then(|| argv.join(" ")),
                }
            })
            .collect();

        Ok(processes)
    }

    #[cfg(unix)]
    fn attach(&self, pid: u32) -> HandleResult<Arc<dyn ProcessHandle>> {
        let handle = crate::process::PidHandle::new(pid)?;
        if handle.try_wait()? {
            return Err(HandleError::NoSuchProcess { pid });
        }
        Ok(Arc::new(handle))
    }

    #[cfg(not(unix))]
    fn attach(&self, _pid: u32) -> HandleResult<Arc<dyn ProcessHandle>> {
        Err(HandleError::Unsupported("signalling foreign processes"))
    }
}
