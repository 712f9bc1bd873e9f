use async_trait::async_trait;
use runp_core::{CommandError, CommandHandle, GracefulShutdown, LaunchState, OutputSink};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio_stream::StreamExt;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, info, warn};

/// A local OS command
pub struct ExecCommand {
    id: String,
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stop_timeout: Duration,
    shutdown: Arc<dyn GracefulShutdown>,
    launch: LaunchState,
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    child: Option<Child>,
}

impl ExecCommand {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(
        id: impl Into<String>,
        program: impl Into<String>,
        args: I,
        shutdown: Arc<dyn GracefulShutdown>,
    ) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: args.into_iter().map(|a| a.to_string()).collect(),
            dir: None,
            env: Vec::new(),
            stop_timeout: runp_core::DEFAULT_STOP_TIMEOUT,
            shutdown,
            launch: LaunchState::new(),
            stdout: None,
            stderr: None,
            child: None,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env<K: ToString, V: ToString, I: IntoIterator<Item = (K, V)>>(mut self, env: I) -> Self {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Shared view used to build a stopper for this command
    pub fn launch_state(&self) -> LaunchState {
        self.launch.clone()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command.stdout(if self.stdout.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stderr(if self.stderr.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        self.shutdown.prepare(&mut command);
        command
    }
}

#[async_trait]
impl CommandHandle for ExecCommand {
    fn pid(&self) -> Option<i32> {
        self.launch.pid()
    }

    fn set_stdout(&mut self, sink: OutputSink) {
        self.stdout = Some(sink);
    }

    fn set_stderr(&mut self, sink: OutputSink) {
        self.stderr = Some(sink);
    }

    async fn start(&mut self) -> Result<(), CommandError> {
        if self.child.is_some() {
            return Err(anyhow::anyhow!("command {} already started", self.id).into());
        }

        let mut child = self.build().spawn().map_err(CommandError::Spawn)?;
        if let Some(pid) = child.id() {
            self.launch.record_pid(pid);
            info!(unit = %self.id, pid = pid, "Spawned {}", self.describe());
        }

        // The sinks move into the relay tasks so the output stream ends
        // with the child's pipes.
        if let (Some(out), Some(sink)) = (child.stdout.take(), self.stdout.take()) {
            tokio::spawn(relay_lines(out, sink));
        }
        if let (Some(err), Some(sink)) = (child.stderr.take(), self.stderr.take()) {
            tokio::spawn(relay_lines(err, sink));
        }

        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), CommandError> {
        let child = self.child.as_mut().ok_or(CommandError::NotStarted)?;
        let status = child.wait().await;
        self.launch.mark_exited();
        let status = status?;
        debug!(unit = %self.id, status = %status, "Process exited");
        exit_result(status)
    }

    async fn stop(&mut self) -> Result<(), CommandError> {
        stop_launched(&*self.shutdown, &self.launch, self.stop_timeout, &self.id).await
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

async fn stop_launched(
    shutdown: &dyn GracefulShutdown,
    launch: &LaunchState,
    timeout: Duration,
    id: &str,
) -> Result<(), CommandError> {
    let state = shutdown.stop(launch, timeout, id).await?;
    debug!(unit = %id, ?state, "Stop finished");
    Ok(())
}

/// Stops whatever an [`ExecCommand`] launched, through the shared
/// [`LaunchState`] only
pub struct ExecCommandStopper {
    id: String,
    launch: LaunchState,
    shutdown: Arc<dyn GracefulShutdown>,
    timeout: Duration,
}

impl ExecCommandStopper {
    pub fn new(
        id: impl Into<String>,
        launch: LaunchState,
        shutdown: Arc<dyn GracefulShutdown>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            launch,
            shutdown,
            timeout,
        }
    }
}

#[async_trait]
impl CommandHandle for ExecCommandStopper {
    fn pid(&self) -> Option<i32> {
        self.launch.pid()
    }

    fn set_stdout(&mut self, _sink: OutputSink) {}

    fn set_stderr(&mut self, _sink: OutputSink) {}

    async fn start(&mut self) -> Result<(), CommandError> {
        self.stop().await
    }

    async fn wait(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CommandError> {
        stop_launched(&*self.shutdown, &self.launch, self.timeout, &self.id).await
    }

    fn describe(&self) -> String {
        format!("stop {} ({:?})", self.id, self.launch.pid())
    }
}

/// Longest output line relayed; the rest of a longer line is dropped
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Relay `reader` line by line until EOF. Lines are split on raw bytes and
/// decoded lossily, so output in any encoding reaches the sink. The reader
/// is always drained to the end, otherwise the child would hit a closed
/// pipe on its next write.
pub(crate) async fn relay_lines<R: AsyncRead + Unpin>(reader: R, sink: OutputSink) {
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), MAX_LINE_LENGTH);
    let mut lines = FramedRead::new(reader, codec);
    // A decode error is followed by a single `None`, then reading resumes.
    let mut resuming = false;
    loop {
        match lines.next().await {
            Some(Ok(line)) => {
                resuming = false;
                sink.write_line(decode_line(&line));
            }
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                warn!(max = MAX_LINE_LENGTH, "Dropping overlong output line");
                resuming = true;
            }
            Some(Err(AnyDelimiterCodecError::Io(e))) => {
                warn!(error = %e, "Stopped relaying process output");
                let mut reader = lines.into_inner();
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    debug!(error = %e, "Draining process output failed");
                }
                return;
            }
            None if resuming => resuming = false,
            None => return,
        }
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn exit_result(status: ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    Err(CommandError::Exited {
        code: status.code(),
        signal,
    })
}

/// Run a short command to completion and return its stdout
pub async fn capture_output<S: AsRef<str>>(
    program: &str,
    args: &[S],
    dir: Option<&Path>,
) -> Result<String, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let output = command.output().await.map_err(CommandError::Spawn)?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(program = %program, stderr = %stderr.trim(), "Command failed");
        exit_result(output.status)?;
    }
    Ok(stdout)
}

/// Look `executable` up on `PATH`, then relative to `workdir`. On failure
/// returns every location tried.
pub fn find_executable(executable: &str, workdir: &Path) -> Result<PathBuf, Vec<String>> {
    let candidate = Path::new(executable);
    if candidate.is_absolute() || candidate.components().count() > 1 {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            workdir.join(candidate)
        };
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(vec![path.display().to_string()])
        };
    }

    let mut tried = Vec::new();
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for name in executable_names(executable) {
                let path = dir.join(name);
                if is_executable(&path) {
                    return Ok(path);
                }
            }
        }
    }
    tried.push(format!("{executable} (PATH)"));

    for name in executable_names(executable) {
        let local = workdir.join(name);
        if is_executable(&local) {
            return Ok(local);
        }
    }
    tried.push(workdir.join(executable).display().to_string());
    Err(tried)
}

fn executable_names(name: &str) -> Vec<String> {
    if cfg!(windows) && Path::new(name).extension().is_none() {
        ["", ".exe", ".cmd", ".bat"]
            .iter()
            .map(|ext| format!("{name}{ext}"))
            .collect()
    } else {
        vec![name.to_string()]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
