mod windows_process_manager;

pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

pub struct WindowsProcessManagerFactory;

#[cfg(windows)]
impl modeldriver_core::ProcessManagerFactory for WindowsProcessManagerFactory {
    type Manager = WindowsProcessManager;

    fn create_process_manager() -> WindowsProcessManager {
        WindowsProcessManager::new()
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
