mod unix_shutdown;

pub use unix_shutdown::UnixGracefulShutdown;

pub struct UnixShutdownFactory;

impl UnixShutdownFactory {
    pub fn create_shutdown() -> UnixGracefulShutdown {
        UnixGracefulShutdown::new()
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}
