//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. the `level` argument (if provided)
//! 2. the `RUNP_LOG` environment variable, in `EnvFilter` syntax
//! 3. `info`

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "RUNP_LOG";

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub fn build_filter(level: Option<&str>) -> Result<EnvFilter> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };
    Ok(filter)
}

/// Install the global subscriber writing to stderr. Calling it again is a
/// no-op.
pub fn init_logging(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = build_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}
