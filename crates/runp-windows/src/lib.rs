mod windows_shutdown;

pub use windows_shutdown::{ProcessPresence, WindowsGracefulShutdown};

pub struct WindowsShutdownFactory;

impl WindowsShutdownFactory {
    pub fn create_shutdown() -> WindowsGracefulShutdown {
        WindowsGracefulShutdown::new()
    }

    pub fn platform_name() -> &'static str {
        "Windows"
    }
}
