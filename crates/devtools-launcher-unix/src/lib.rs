mod unix_process_manager;

use devtools_launcher_core::ProcessManagerFactory;

pub use unix_process_manager::UnixProcessManager;

pub struct UnixProcessManagerFactory;

impl ProcessManagerFactory for UnixProcessManagerFactory {
    type Manager = UnixProcessManager;

    fn create_process_manager() -> UnixProcessManager {
        UnixProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
