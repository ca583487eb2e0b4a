use anyhow::Result;
use devtools_launcher_core::{ProcessId, ProcessManager, TerminationResult};
use tokio::process::Command;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use sysinfo::System;
    use tracing::{info, warn};

    /// Unix process manager: the browser leads its own process group, so a
    /// single `killpg` reaches every renderer and helper it started.
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UnixProcessManager {
        pub fn new() -> Self {
            info!("Initializing Unix process manager");
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }

        fn kill_single(pid: ProcessId) -> TerminationResult {
            match signal::kill(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to kill process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGKILL to process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }

        /// Kill descendants bottom-up, then the root
        fn kill_tree(&self, root_pid: ProcessId) -> TerminationResult {
            match self.find_child_processes(root_pid) {
                Ok(children) => {
                    for child in children {
                        match Self::kill_single(child) {
                            TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                            result => {
                                warn!("Failed to kill child process {}: {:?}", child, result);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to find child processes for PID {}: {}", root_pid, e);
                }
            }
            Self::kill_single(root_pid)
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

    impl ProcessManager for UnixProcessManager {
        fn prepare_command(&self, command: &mut Command) {
            // Own process group so the whole tree can be signalled at once
            command.process_group(0);
        }

        fn force_kill_tree(&self, pid: ProcessId) -> TerminationResult {
            let pgid = NixPid::from_raw(pid.0 as i32);

            match signal::killpg(pgid, Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process group {}", pid);
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::ESRCH) => {
                    // The leader may have moved itself out of the group
                    info!("Process group {} not found, falling back to process tree", pid);
                    self.kill_tree(pid)
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!("Permission denied to kill process group {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send SIGKILL to process group {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL to process group failed: {e}"))
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

}

#[cfg(unix)]
pub use unix_impl::UnixProcessManager;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(unix))]
impl ProcessManager for UnixProcessManager {
    fn prepare_command(&self, _command: &mut Command) {}

    fn force_kill_tree(&self, _pid: ProcessId) -> TerminationResult {
        TerminationResult::Failed("process groups are only available on Unix".to_string())
    }

    fn find_child_processes(&self, _pid: ProcessId) -> Result<Vec<ProcessId>> {
        Ok(Vec::new())
    }
}
