use anyhow::Result;
use std::fmt;
use tokio::process::Command;

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Kill request was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

impl TerminationResult {
    /// The process is gone or on its way out
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// Platform-specific process operations used by the supervisor.
///
/// Every method is synchronous: forced kill runs from signal handlers and
/// from `Drop`, where there is nothing to await on.
pub trait ProcessManager: Send + Sync {
    /// Apply platform spawn settings (own process group, no console window, ...)
    fn prepare_command(&self, command: &mut Command);

    /// Kill the process and everything it started
    fn force_kill_tree(&self, pid: ProcessId) -> TerminationResult;

    /// Find all descendants of a process, deepest first
    fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager + 'static;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
