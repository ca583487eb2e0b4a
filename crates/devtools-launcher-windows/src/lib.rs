//! Windows-specific process management implementation

mod windows_process_manager;

pub use windows_process_manager::WindowsProcessManager;

/// Windows-specific process manager factory
pub struct WindowsProcessManagerFactory;

impl devtools_launcher_core::ProcessManagerFactory for WindowsProcessManagerFactory {
    type Manager = WindowsProcessManager;

    fn create_process_manager() -> WindowsProcessManager {
        WindowsProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
