use std::fmt;
use thiserror::Error;

pub const SIGINT: i32 = 2;
pub const SIGKILL: i32 = 9;
pub const SIGTERM: i32 = 15;

/// Errors raised while turning a unit into a running process
#[derive(Error, Debug)]
pub enum RunpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executable for process {unit} not found. Tried {}", .tried.join(", "))]
    ExecutableNotFound { unit: String, tried: Vec<String> },

    #[error("Await error: {0}")]
    Await(String),

    #[error(transparent)]
    Start(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RunpError {
    pub fn config(message: impl Into<String>) -> Self {
        RunpError::Config(message.into())
    }

    /// Errors detected before anything was launched
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RunpError::Config(_) | RunpError::ExecutableNotFound { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunpError::Config(_) => "Config",
            RunpError::ExecutableNotFound { .. } => "ExecutableNotFound",
            RunpError::Await(_) => "Await",
            RunpError::Start(e) => e.kind(),
            RunpError::Io(_) => "Io",
            RunpError::Other(_) => "Other",
        }
    }
}

/// Failures of a command handle
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("No Command set")]
    NotStarted,

    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("{}", describe_exit(*.code, *.signal))]
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("{0}")]
    Close(MultiError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::NotStarted => "NotStarted",
            CommandError::Spawn(_) => "Spawn",
            CommandError::Exited { .. } => "Exited",
            CommandError::Io(_) => "Io",
            CommandError::Ssh(_) => "Ssh",
            CommandError::Close(_) => "Close",
            CommandError::Other(_) => "Other",
        }
    }

    /// True for an exit status error, the only kind a shutdown can explain
    pub fn is_exit_status(&self) -> bool {
        matches!(self, CommandError::Exited { .. })
    }

    /// Termination by SIGTERM, SIGINT or SIGKILL, either reported as a signal
    /// or as the `128 + signal` exit code a shell uses
    pub fn is_termination_signal(&self) -> bool {
        match self {
            CommandError::Exited { signal: Some(sig), .. } => is_stop_signal(*sig),
            CommandError::Exited {
                code: Some(code), ..
            } if *code > 128 => is_stop_signal(*code - 128),
            _ => false,
        }
    }
}

fn is_stop_signal(signal: i32) -> bool {
    matches!(signal, SIGINT | SIGKILL | SIGTERM)
}

fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (_, Some(SIGTERM)) => "signal: terminated".to_string(),
        (_, Some(SIGINT)) => "signal: interrupt".to_string(),
        (_, Some(SIGKILL)) => "signal: killed".to_string(),
        (_, Some(other)) => format!("signal: {other}"),
        (Some(code), None) => format!("exit status {code}"),
        (None, None) => "exit status unknown".to_string(),
    }
}

/// Several errors collected while closing related resources
#[derive(Debug, Default)]
pub struct MultiError(Vec<anyhow::Error>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<anyhow::Error>) {
        self.0.push(error.into());
    }

    pub fn extend(&mut self, other: MultiError) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.0
    }

    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.0[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for error in &self.0 {
                    write!(f, "\n\t* {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}
