//! Blocking a unit until a resource it depends on becomes reachable.
//!
//! Supported locators: `file://`, `tcp://`, `tcp4://`, `tcp6://`, `unix://`,
//! `http://` and `https://`. Without a locator the unit just sleeps for the
//! timeout.

use anyhow::{Context, bail};
use backon::{ConstantBuilder, Retryable};
use runp_core::{AwaitCondition, RunpError, parse_duration};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Interval between two reachability probes
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum AwaitError {
    #[error("Invalid duration format {value:?}: {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error("Unsupported resource {0}")]
    UnsupportedResource(String),

    #[error("Invalid resource {resource}: {reason}")]
    InvalidResource { resource: String, reason: String },

    #[error("Timeout waiting for {resource} after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },
}

impl From<AwaitError> for RunpError {
    fn from(error: AwaitError) -> Self {
        RunpError::Await(error.to_string())
    }
}

/// Parsed resource locator
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    File(PathBuf),
    Tcp { host: String, port: u16, family: IpFamily },
    Unix(PathBuf),
    Http(Url),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    Any,
    V4,
    V6,
}

impl Resource {
    pub fn parse(locator: &str) -> Result<Self, AwaitError> {
        let invalid = |reason: String| AwaitError::InvalidResource {
            resource: locator.to_string(),
            reason,
        };

        if let Some(path) = locator.strip_prefix("file://") {
            return Ok(Resource::File(PathBuf::from(path)));
        }
        if let Some(path) = locator.strip_prefix("unix://") {
            return Ok(Resource::Unix(PathBuf::from(path)));
        }

        let url = Url::parse(locator).map_err(|e| invalid(e.to_string()))?;
        let family = match url.scheme() {
            "http" | "https" => return Ok(Resource::Http(url)),
            "tcp" => IpFamily::Any,
            "tcp4" => IpFamily::V4,
            "tcp6" => IpFamily::V6,
            _ => return Err(AwaitError::UnsupportedResource(locator.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port()
            .ok_or_else(|| invalid("missing port".to_string()))?;
        Ok(Resource::Tcp { host, port, family })
    }

    /// One reachability probe
    pub async fn check(&self) -> anyhow::Result<()> {
        match self {
            Resource::File(path) => {
                tokio::fs::metadata(path)
                    .await
                    .with_context(|| format!("file {} not found", path.display()))?;
            }
            Resource::Tcp { host, port, family } => {
                let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), *port))
                    .await?
                    .filter(|addr| match family {
                        IpFamily::Any => true,
                        IpFamily::V4 => addr.is_ipv4(),
                        IpFamily::V6 => addr.is_ipv6(),
                    })
                    .collect();
                if addrs.is_empty() {
                    bail!("no matching address for {host}:{port}");
                }
                tokio::net::TcpStream::connect(addrs.as_slice()).await?;
            }
            Resource::Unix(path) => {
                #[cfg(unix)]
                tokio::net::UnixStream::connect(path)
                    .await
                    .with_context(|| format!("connecting to {}", path.display()))?;
                #[cfg(not(unix))]
                bail!("unix sockets are not supported here: {}", path.display());
            }
            Resource::Http(url) => {
                let client = reqwest::Client::builder()
                    .timeout(HTTP_PROBE_TIMEOUT)
                    .build()?;
                let response = client.get(url.clone()).send().await?;
                if !response.status().is_success() {
                    bail!("{url} answered {}", response.status());
                }
            }
        }
        Ok(())
    }
}

/// `None` means no deadline: an empty timeout or `0`
pub fn parse_timeout(value: &str) -> Result<Option<Duration>, AwaitError> {
    if value.is_empty() {
        return Ok(None);
    }
    let timeout = parse_duration(value).map_err(|e| AwaitError::InvalidTimeout {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(timeout).filter(|timeout| !timeout.is_zero()))
}

/// Block until `condition` is satisfied or its timeout elapses
pub async fn wait_for(condition: &AwaitCondition, unit: &str) -> Result<(), AwaitError> {
    let deadline = parse_timeout(&condition.timeout)?;

    if condition.resource.is_empty() {
        if let Some(timeout) = deadline {
            info!(unit = %unit, "Sleeping {:?} before starting", timeout);
            tokio::time::sleep(timeout).await;
        }
        return Ok(());
    }

    let resource = Resource::parse(&condition.resource)?;
    info!(unit = %unit, resource = %condition.resource, ?deadline, "Waiting for resource");

    let backoff = ConstantBuilder::default()
        .with_delay(POLL_INTERVAL)
        .with_max_times(usize::MAX);
    let polling = (|| resource.check()).retry(backoff).notify(|e, delay| {
        debug!(unit = %unit, error = %e, "Resource not ready, retrying in {:?}", delay);
    });

    let reached = match deadline {
        Some(timeout) => match tokio::time::timeout(timeout, polling).await {
            Ok(reached) => reached,
            Err(_) => {
                return Err(AwaitError::Timeout {
                    resource: condition.resource.clone(),
                    timeout,
                });
            }
        },
        None => polling.await,
    };

    reached.map_err(|e| AwaitError::InvalidResource {
        resource: condition.resource.clone(),
        reason: e.to_string(),
    })?;
    info!(unit = %unit, resource = %condition.resource, "Resource is available");
    Ok(())
}
