use devtools_launcher_core::{ProcessManager, ProcessManagerFactory};
use std::sync::Arc;
use tracing::debug;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    #[cfg(unix)]
    type Manager = devtools_launcher_unix::UnixProcessManager;

    #[cfg(windows)]
    type Manager = devtools_launcher_windows::WindowsProcessManager;

    fn create_process_manager() -> Self::Manager {
        #[cfg(unix)]
        return devtools_launcher_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return devtools_launcher_windows::WindowsProcessManagerFactory::create_process_manager();
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return devtools_launcher_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return devtools_launcher_windows::WindowsProcessManagerFactory::platform_name();
    }
}

/// Convenience function to create a platform-appropriate ProcessManager
pub fn create_process_manager() -> Arc<dyn ProcessManager> {
    debug!(
        "Creating process manager for platform: {}",
        PlatformProcessManagerFactory::platform_name()
    );
    Arc::new(PlatformProcessManagerFactory::create_process_manager())
}
