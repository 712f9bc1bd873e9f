use crate::process::LaunchState;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// How often a stopping child is polled for exit
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Progress of a stop request
///
/// `Running -> SignalSent -> (Exited | ForceKilled)`; `NotRunning` when there
/// was nothing to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    NotRunning,
    Running,
    SignalSent,
    Exited,
    ForceKilled,
}

impl ShutdownState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ShutdownState::NotRunning | ShutdownState::Exited | ShutdownState::ForceKilled
        )
    }
}

/// Platform termination sequence for a launched child
#[async_trait]
pub trait GracefulShutdown: Send + Sync {
    /// Adjust a command before spawn so that `stop` can reach it later
    fn prepare(&self, command: &mut tokio::process::Command);

    /// Ask the child to exit, poll until `timeout`, then force it. Only
    /// reads `launch`; never waits on the child.
    async fn stop(&self, launch: &LaunchState, timeout: Duration, id: &str)
    -> Result<ShutdownState>;

    fn platform_name(&self) -> &'static str;
}

/// Poll `is_alive` every [`EXIT_POLL_INTERVAL`] until it reports false or
/// `timeout` elapses. Returns true when the child went away.
pub async fn poll_for_exit<F>(launch: &LaunchState, timeout: Duration, mut is_alive: F) -> bool
where
    F: FnMut() -> bool + Send,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if launch.has_exited() || !is_alive() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
