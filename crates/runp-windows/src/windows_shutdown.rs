use anyhow::Result;
use async_trait::async_trait;
use runp_core::{GracefulShutdown, LaunchState, ShutdownState};
use std::time::Duration;

/// What a process-open probe says about a pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPresence {
    Running,
    Exited,
    AccessDenied,
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use runp_core::poll_for_exit;
    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, STILL_ACTIVE};
    use windows::Win32::System::Threading::{
        CREATE_NEW_PROCESS_GROUP, GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION,
        PROCESS_TERMINATE, TerminateProcess,
    };

    const ACCESS_DENIED_GRACE: Duration = Duration::from_millis(100);

    /// Windows has no SIGTERM: terminate directly, classify failures, poll
    #[derive(Debug, Default, Clone)]
    pub struct WindowsGracefulShutdown;

    impl WindowsGracefulShutdown {
        pub fn new() -> Self {
            Self
        }

        pub fn probe(pid: u32) -> ProcessPresence {
            // SAFETY: the handle is checked and closed before returning.
            unsafe {
                match OpenProcess(PROCESS_QUERY_INFORMATION, false, pid) {
                    Ok(handle) => {
                        let mut code = 0u32;
                        let alive = GetExitCodeProcess(handle, &mut code).is_ok()
                            && code == STILL_ACTIVE.0 as u32;
                        let _ = CloseHandle(handle);
                        if alive {
                            ProcessPresence::Running
                        } else {
                            ProcessPresence::Exited
                        }
                    }
                    Err(e) if e.code() == ERROR_ACCESS_DENIED.to_hresult() => {
                        ProcessPresence::AccessDenied
                    }
                    Err(_) => ProcessPresence::Exited,
                }
            }
        }

        fn terminate(pid: u32) -> windows::core::Result<()> {
            // SAFETY: the handle is closed on every path.
            unsafe {
                let handle = OpenProcess(PROCESS_TERMINATE, false, pid)?;
                let result = TerminateProcess(handle, 1);
                let _ = CloseHandle(handle);
                result
            }
        }

        /// Decide whether a failed terminate is a real failure
        async fn handle_terminate_error(
            pid: u32,
            error: windows::core::Error,
            id: &str,
        ) -> Result<()> {
            match Self::probe(pid) {
                ProcessPresence::Exited => {
                    debug!(unit = %id, pid, "Process already exited");
                    Ok(())
                }
                ProcessPresence::AccessDenied => {
                    let _ = Self::terminate(pid);
                    tokio::time::sleep(ACCESS_DENIED_GRACE).await;
                    if Self::probe(pid) == ProcessPresence::Running {
                        debug!(
                            unit = %id,
                            pid,
                            "Access denied terminating process, it will likely exit on its own"
                        );
                    }
                    Ok(())
                }
                ProcessPresence::Running => {
                    warn!(unit = %id, pid, error = %error, "Failed to terminate process");
                    Err(anyhow::anyhow!("terminating {id} (pid {pid}) failed: {error}"))
                }
            }
        }
    }

    #[async_trait]
    impl GracefulShutdown for WindowsGracefulShutdown {
        fn prepare(&self, command: &mut tokio::process::Command) {
            command.creation_flags(CREATE_NEW_PROCESS_GROUP.0);
        }

        async fn stop(
            &self,
            launch: &LaunchState,
            timeout: Duration,
            id: &str,
        ) -> Result<ShutdownState> {
            let Some(raw_pid) = launch.pid() else {
                debug!(unit = %id, "Nothing to stop, process was never started");
                return Ok(ShutdownState::NotRunning);
            };
            if launch.has_exited() {
                debug!(unit = %id, pid = raw_pid, "Process already exited");
                return Ok(ShutdownState::NotRunning);
            }
            let pid = raw_pid as u32;

            if let Err(e) = Self::terminate(pid) {
                Self::handle_terminate_error(pid, e, id).await?;
            }
            let state = ShutdownState::SignalSent;
            info!(unit = %id, pid, ?state, "Terminate requested");

            if poll_for_exit(launch, timeout, || Self::probe(pid) == ProcessPresence::Running).await
            {
                return Ok(ShutdownState::Exited);
            }

            warn!(unit = %id, pid, "Process still running after {:?}, terminating again", timeout);
            match Self::terminate(pid) {
                Ok(()) => Ok(ShutdownState::ForceKilled),
                Err(e) => {
                    debug!(unit = %id, pid, error = %e, "Final terminate failed");
                    Ok(ShutdownState::ForceKilled)
                }
            }
        }

        fn platform_name(&self) -> &'static str {
            "Windows"
        }
    }
}

#[cfg(windows)]
pub use windows_impl::WindowsGracefulShutdown;

// Stub for non-Windows builds
#[cfg(not(windows))]
#[derive(Debug, Default, Clone)]
pub struct WindowsGracefulShutdown;

#[cfg(not(windows))]
impl WindowsGracefulShutdown {
    pub fn new() -> Self {
        Self
    }

    pub fn probe(_pid: u32) -> ProcessPresence {
        ProcessPresence::Exited
    }
}

#[cfg(not(windows))]
#[async_trait]
impl GracefulShutdown for WindowsGracefulShutdown {
    fn prepare(&self, _command: &mut tokio::process::Command) {}

    async fn stop(
        &self,
        _launch: &LaunchState,
        _timeout: Duration,
        _id: &str,
    ) -> Result<ShutdownState> {
        anyhow::bail!("Windows shutdown is not available on this platform")
    }

    fn platform_name(&self) -> &'static str {
        "Windows"
    }
}
