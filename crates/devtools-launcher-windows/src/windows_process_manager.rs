use anyhow::Result;
use std::sync::Mutex;
use sysinfo::System;
use tokio::process::Command;
use tracing::{info, warn};

use devtools_launcher_core::*;

/// Windows-specific process manager with process tree termination
pub struct WindowsProcessManager {
    system: Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsProcessManager {
    pub fn new() -> Self {
        info!("Initializing Windows process manager with system monitoring");
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        let Ok(mut system) = self.system.lock() else {
            return false;
        };
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::default(),
        );
        system.processes().keys().any(|p| p.as_u32() == pid.0)
    }

    /// Recursively find all child processes
    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if process.parent().map(|p| p.as_u32()) == Some(parent_pid) {
                let child_pid = pid.as_u32();
                Self::find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn prepare_command(&self, _command: &mut Command) {
        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW (0x08000000) - no console window for the browser process
            _command.creation_flags(0x08000000);
        }
    }

    fn force_kill_tree(&self, pid: ProcessId) -> TerminationResult {
        // Runs from signal handlers and Drop, so this blocks instead of awaiting
        let output = std::process::Command::new("taskkill")
            .args(["/pid", &pid.0.to_string(), "/T", "/F"])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                info!(pid = %pid, "Force killed process tree");
                TerminationResult::Success
            }
            Ok(output) => {
                if !self.is_alive(pid) {
                    info!(pid = %pid, "Process tree not found (already terminated)");
                    return TerminationResult::ProcessNotFound;
                }
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(pid = %pid, stderr = %stderr, "taskkill failed");
                TerminationResult::Failed(format!("taskkill failed: {}", stderr.trim()))
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to run taskkill");
                TerminationResult::Failed(format!("Failed to run taskkill: {e}"))
            }
        }
    }

    fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow::anyhow!("process table lock poisoned"))?;
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::default(),
        );

        let mut children = Vec::new();
        Self::find_children_recursive(&system, parent_pid.0, &mut children);

        Ok(children.into_iter().map(ProcessId::from).collect())
    }
}
