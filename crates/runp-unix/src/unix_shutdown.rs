use anyhow::Result;
use async_trait::async_trait;
use runp_core::{GracefulShutdown, LaunchState, ShutdownState};
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use runp_core::poll_for_exit;
    use tracing::{debug, info, warn};

    enum Delivery {
        Delivered,
        Gone,
        Failed(Errno),
    }

    /// SIGTERM to the child's process group, poll, then SIGKILL
    #[derive(Debug, Default, Clone)]
    pub struct UnixGracefulShutdown;

    impl UnixGracefulShutdown {
        pub fn new() -> Self {
            Self
        }

        /// Signal the whole group first so shell scripts and their children
        /// see it; fall back to the process alone
        fn send(pid: NixPid, sig: Signal) -> Delivery {
            match signal::killpg(pid, sig) {
                Ok(()) => {
                    debug!("Sent {} to process group {}", sig, pid);
                    Delivery::Delivered
                }
                Err(group_err) => match signal::kill(pid, sig) {
                    Ok(()) => {
                        debug!(
                            "Sent {} to process {} (group signal failed: {})",
                            sig, pid, group_err
                        );
                        Delivery::Delivered
                    }
                    Err(Errno::ESRCH) => Delivery::Gone,
                    Err(e) => Delivery::Failed(e),
                },
            }
        }

        fn is_alive(pid: NixPid) -> bool {
            match signal::kill(pid, None) {
                Ok(()) => true,
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }
    }

    #[async_trait]
    impl GracefulShutdown for UnixGracefulShutdown {
        fn prepare(&self, command: &mut tokio::process::Command) {
            command.process_group(0);
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

            let pid = NixPid::from_raw(raw_pid);
            let mut state = ShutdownState::Running;
            match Self::send(pid, Signal::SIGTERM) {
                Delivery::Delivered => {
                    info!(unit = %id, pid = raw_pid, "Sent SIGTERM");
                    state = ShutdownState::SignalSent;
                }
                Delivery::Gone => {
                    info!("Process {} not found (already terminated)", raw_pid);
                    return Ok(ShutdownState::NotRunning);
                }
                Delivery::Failed(e) => {
                    warn!("Failed to send SIGTERM to process {}: {}", raw_pid, e);
                    anyhow::bail!("SIGTERM to {id} (pid {raw_pid}) failed: {e}");
                }
            }
            debug!(unit = %id, ?state, "Waiting for exit");

            if poll_for_exit(launch, timeout, || Self::is_alive(pid)).await {
                info!(unit = %id, pid = raw_pid, "Process exited after SIGTERM");
                return Ok(ShutdownState::Exited);
            }

            warn!(
                unit = %id,
                pid = raw_pid,
                "Process still running after {:?}, sending SIGKILL",
                timeout
            );
            match Self::send(pid, Signal::SIGKILL) {
                Delivery::Delivered => Ok(ShutdownState::ForceKilled),
                Delivery::Gone => Ok(ShutdownState::Exited),
                Delivery::Failed(e) => {
                    warn!("Failed to send SIGKILL to process {}: {}", raw_pid, e);
                    anyhow::bail!("SIGKILL to {id} (pid {raw_pid}) failed: {e}")
                }
            }
        }

        fn platform_name(&self) -> &'static str {
            "Unix"
        }
    }
}

#[cfg(unix)]
pub use unix_impl::UnixGracefulShutdown;

// Stub for non-Unix builds
#[cfg(not(unix))]
#[derive(Debug, Default, Clone)]
pub struct UnixGracefulShutdown;

#[cfg(not(unix))]
impl UnixGracefulShutdown {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
#[async_trait]
impl GracefulShutdown for UnixGracefulShutdown {
    fn prepare(&self, _command: &mut tokio::process::Command) {}

    async fn stop(
        &self,
        _launch: &LaunchState,
        _timeout: Duration,
        _id: &str,
    ) -> Result<ShutdownState> {
        anyhow::bail!("Unix shutdown is not available on this platform")
    }

    fn platform_name(&self) -> &'static str {
        "Unix"
    }
}
