use anyhow::Result;
use async_trait::async_trait;
use runp_core::{GracefulShutdown, LaunchState, ShutdownState};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shutdown protocol of the platform runp was built for
#[derive(Clone)]
pub enum PlatformShutdown {
    #[cfg(unix)]
    Unix(Arc<runp_unix::UnixGracefulShutdown>),
    #[cfg(windows)]
    Windows(Arc<runp_windows::WindowsGracefulShutdown>),
}

impl PlatformShutdown {
    pub fn new() -> Self {
        #[cfg(unix)]
        {
            debug!("Creating Unix shutdown protocol");
            Self::Unix(Arc::new(runp_unix::UnixShutdownFactory::create_shutdown()))
        }

        #[cfg(windows)]
        {
            debug!("Creating Windows shutdown protocol");
            Self::Windows(Arc::new(
                runp_windows::WindowsShutdownFactory::create_shutdown(),
            ))
        }

        #[cfg(not(any(unix, windows)))]
        {
            compile_error!("Unsupported platform: only Unix and Windows are currently supported");
        }
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        {
            runp_unix::UnixShutdownFactory::platform_name()
        }

        #[cfg(windows)]
        {
            runp_windows::WindowsShutdownFactory::platform_name()
        }

        #[cfg(not(any(unix, windows)))]
        {
            "Unknown"
        }
    }
}

impl Default for PlatformShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GracefulShutdown for PlatformShutdown {
    fn prepare(&self, command: &mut tokio::process::Command) {
        match self {
            #[cfg(unix)]
            Self::Unix(shutdown) => shutdown.prepare(command),
            #[cfg(windows)]
            Self::Windows(shutdown) => shutdown.prepare(command),
        }
    }

    async fn stop(&self, launch: &LaunchState, timeout: Duration, id: &str) -> Result<ShutdownState> {
        match self {
            #[cfg(unix)]
            Self::Unix(shutdown) => shutdown.stop(launch, timeout, id).await,
            #[cfg(windows)]
            Self::Windows(shutdown) => shutdown.stop(launch, timeout, id).await,
        }
    }

    fn platform_name(&self) -> &'static str {
        PlatformShutdown::platform_name()
    }
}

/// Selects the shutdown implementation at compile time
pub struct PlatformShutdownFactory;

impl PlatformShutdownFactory {
    pub fn create_shutdown() -> Arc<dyn GracefulShutdown> {
        Arc::new(PlatformShutdown::new())
    }

    pub fn platform_name() -> &'static str {
        PlatformShutdown::platform_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformShutdownFactory::platform_name();
        #[cfg(unix)]
        assert_eq!(platform, "Unix");
        #[cfg(windows)]
        assert_eq!(platform, "Windows");

        let shutdown = PlatformShutdownFactory::create_shutdown();
        assert_eq!(shutdown.platform_name(), platform);
    }

    #[tokio::test]
    async fn test_stop_without_launch_is_noop() {
        let shutdown = PlatformShutdownFactory::create_shutdown();
        let outcome = shutdown
            .stop(&LaunchState::new(), Duration::from_millis(10), "idle")
            .await
            .unwrap();
        assert_eq!(outcome, ShutdownState::NotRunning);
    }
}
