use crate::config::AwaitCondition;
use crate::error::{CommandError, RunpError};
use crate::preconditions::{PreconditionVerifyResult, Preconditions};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Runtime capability object bound to a unit
///
/// A process hands out independent command handles for starting and for
/// stopping. The stop handle only sees what the start handle published in a
/// [`LaunchState`], never the child itself, so stopping works while another
/// task is blocked waiting on the start handle.
#[async_trait]
pub trait Process: Send + Sync {
    fn id(&self) -> &str;

    fn dir(&self) -> &Path;

    fn preconditions(&self) -> &Preconditions;

    async fn verify_preconditions(&self) -> PreconditionVerifyResult;

    fn start_command(&self) -> Result<Box<dyn CommandHandle>, RunpError>;

    fn stop_command(&self) -> Result<Box<dyn CommandHandle>, RunpError>;

    fn stop_timeout(&self) -> Duration;

    fn await_condition(&self) -> &AwaitCondition;

    fn should_wait(&self) -> bool {
        self.await_condition().should_wait()
    }

    async fn is_startable(&self) -> Result<bool, RunpError>;
}

/// Start, capture output, wait and stop
#[async_trait]
pub trait CommandHandle: Send {
    /// OS pid once launched; tunnels report a fixed negative value
    fn pid(&self) -> Option<i32>;

    fn set_stdout(&mut self, sink: OutputSink);

    fn set_stderr(&mut self, sink: OutputSink);

    async fn start(&mut self) -> Result<(), CommandError>;

    async fn wait(&mut self) -> Result<(), CommandError>;

    async fn run(&mut self) -> Result<(), CommandError> {
        self.start().await?;
        self.wait().await
    }

    async fn stop(&mut self) -> Result<(), CommandError>;

    /// Human readable form for logs
    fn describe(&self) -> String;
}

/// Cloneable line sink feeding an [`OutputStream`]
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving end of the output channel; ends once every sink is dropped
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutputSink {
    pub fn channel() -> (OutputSink, OutputStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (OutputSink { tx }, OutputStream { rx })
    }

    pub fn write_line(&self, line: impl Into<String>) {
        // The reader may already be gone during shutdown.
        let _ = self.tx.send(line.into());
    }
}

impl OutputStream {
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[derive(Debug, Default)]
struct LaunchInner {
    pid: AtomicI32,
    exited: AtomicBool,
}

/// Externally observable state of a launched child
#[derive(Debug, Clone, Default)]
pub struct LaunchState {
    inner: Arc<LaunchInner>,
}

impl LaunchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pid(&self, pid: u32) {
        self.inner.pid.store(pid as i32, Ordering::SeqCst);
    }

    pub fn pid(&self) -> Option<i32> {
        match self.inner.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn mark_exited(&self) {
        self.inner.exited.store(true, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exited.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_stream_ends_when_sinks_drop() {
        let (sink, mut stream) = OutputSink::channel();
        let other = sink.clone();
        sink.write_line("first");
        other.write_line("second");
        drop(sink);
        drop(other);

        assert_eq!(stream.next_line().await.as_deref(), Some("first"));
        assert_eq!(stream.next_line().await.as_deref(), Some("second"));
        assert_eq!(stream.next_line().await, None);
    }

    #[test]
    fn test_launch_state_is_shared() {
        let state = LaunchState::new();
        assert_eq!(state.pid(), None);
        assert!(!state.has_exited());

        let observer = state.clone();
        state.record_pid(4242);
        state.mark_exited();
        assert_eq!(observer.pid(), Some(4242));
        assert!(observer.has_exited());
    }
}
