use crate::duration::parse_duration;
use crate::error::RunpError;
use crate::preconditions::Preconditions;
use crate::template::home_dir;
use derive_builder::Builder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONTAINER_RUNNER: &str = "docker";
pub const CONTAINER_RUNNER_ENV: &str = "RUNP_CONTAINER_RUNNER";

/// The full set of units to run together
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Runpfile {
    pub name: String,
    pub description: String,
    pub version: String,
    pub vars: HashMap<String, String>,
    /// Directory relative working dirs are resolved against
    pub root: PathBuf,
    pub units: BTreeMap<String, Unit>,
    #[serde(skip)]
    pub secret_key: String,
}

impl Runpfile {
    /// Add a unit keyed by its name
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.insert(unit.name.clone(), unit);
        self
    }

    /// Give every unnamed unit the key it is declared under
    pub fn normalize(&mut self) {
        for (key, unit) in self.units.iter_mut() {
            if unit.name.is_empty() {
                unit.name = key.clone();
            }
        }
    }

    pub fn root_dir(&self) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            self.root.clone()
        }
    }

    pub fn longest_unit_name(&self) -> usize {
        self.units
            .values()
            .map(|unit| unit.name.chars().count())
            .max()
            .unwrap_or(0)
    }
}

/// One declared workload
#[derive(Debug, Clone, PartialEq, Deserialize, Builder)]
#[serde(try_from = "RawUnit")]
#[builder(setter(into))]
pub struct Unit {
    #[builder(default)]
    pub name: String,
    #[builder(default)]
    pub description: String,
    /// Duration string such as `10s`; empty or invalid means five seconds
    #[builder(default)]
    pub stop_timeout: String,
    #[builder(default)]
    pub preconditions: Preconditions,
    pub spec: ProcessSpec,
}

impl Unit {
    pub fn builder() -> UnitBuilder {
        UnitBuilder::default()
    }

    pub fn stop_timeout(&self) -> Duration {
        stop_timeout_or_default(&self.stop_timeout)
    }
}

pub fn stop_timeout_or_default(value: &str) -> Duration {
    if value.is_empty() {
        return DEFAULT_STOP_TIMEOUT;
    }
    parse_duration(value).unwrap_or_else(|e| {
        warn!(value = %value, error = %e, "Invalid stop timeout, using default");
        DEFAULT_STOP_TIMEOUT
    })
}

#[derive(Deserialize)]
struct RawUnit {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    stop_timeout: String,
    #[serde(default)]
    preconditions: Preconditions,
    host: Option<HostSpec>,
    container: Option<ContainerSpec>,
    ssh_tunnel: Option<SshTunnelSpec>,
}

impl TryFrom<RawUnit> for Unit {
    type Error = RunpError;

    fn try_from(raw: RawUnit) -> Result<Self, Self::Error> {
        let mut specs = Vec::with_capacity(1);
        if let Some(host) = raw.host {
            specs.push(ProcessSpec::Host(host));
        }
        if let Some(container) = raw.container {
            specs.push(ProcessSpec::Container(container));
        }
        if let Some(tunnel) = raw.ssh_tunnel {
            specs.push(ProcessSpec::SshTunnel(tunnel));
        }

        if specs.len() != 1 {
            let kinds: Vec<&str> = specs.iter().map(ProcessSpec::kind).collect();
            return Err(RunpError::config(format!(
                "unit '{}' must declare exactly one of host, container, ssh_tunnel (found {:?})",
                raw.name, kinds
            )));
        }
        let spec = specs.remove(0);

        Ok(Unit {
            name: raw.name,
            description: raw.description,
            stop_timeout: raw.stop_timeout,
            preconditions: raw.preconditions,
            spec,
        })
    }
}

/// How a unit runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessSpec {
    Host(HostSpec),
    Container(ContainerSpec),
    SshTunnel(SshTunnelSpec),
}

impl ProcessSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessSpec::Host(_) => "host",
            ProcessSpec::Container(_) => "container",
            ProcessSpec::SshTunnel(_) => "ssh_tunnel",
        }
    }

    pub fn await_condition(&self) -> &AwaitCondition {
        match self {
            ProcessSpec::Host(spec) => &spec.await_condition,
            ProcessSpec::Container(spec) => &spec.await_condition,
            ProcessSpec::SshTunnel(spec) => &spec.await_condition,
        }
    }
}

impl From<HostSpec> for ProcessSpec {
    fn from(spec: HostSpec) -> Self {
        ProcessSpec::Host(spec)
    }
}

impl From<ContainerSpec> for ProcessSpec {
    fn from(spec: ContainerSpec) -> Self {
        ProcessSpec::Container(spec)
    }
}

impl From<SshTunnelSpec> for ProcessSpec {
    fn from(spec: SshTunnelSpec) -> Self {
        ProcessSpec::SshTunnel(spec)
    }
}

/// A resource to wait for before starting, and how long to wait
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AwaitCondition {
    /// `file://`, `tcp://`, `tcp4://`, `tcp6://`, `unix://`, `http://` or `https://` locator
    pub resource: String,
    pub timeout: String,
}

impl AwaitCondition {
    pub fn new(resource: impl Into<String>, timeout: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            timeout: timeout.into(),
        }
    }

    pub fn should_wait(&self) -> bool {
        !self.resource.is_empty() || !self.timeout.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Shell {
    pub path: String,
    pub args: Vec<String>,
}

/// A plain command on this machine
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostSpec {
    /// Command line run through the shell
    pub command: String,
    /// Executable run directly with `args`; takes precedence over `command`
    pub executable: String,
    pub args: Vec<String>,
    pub shell: Option<Shell>,
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    #[serde(rename = "await")]
    pub await_condition: AwaitCondition,
}

/// A container started through the configured runner
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub image: String,
    /// Defaults to `runp-<unit id>`
    pub name: String,
    pub ports: Vec<String>,
    pub skip_rm: bool,
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub mounts: Vec<String>,
    pub shm_size: String,
    pub command: String,
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    #[serde(rename = "await")]
    pub await_condition: AwaitCondition,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub secret: String,
    /// Base64 ciphertext, decrypted with the run's secret key
    pub encrypted_secret: String,
    pub identity_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host_or_localhost(&self) -> &str {
        if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_or_localhost(), self.port)
    }
}

/// Local port forwarded through a jump host to a target
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SshTunnelSpec {
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    #[serde(rename = "await")]
    pub await_condition: AwaitCondition,
    pub user: String,
    pub auth: Auth,
    pub local: Endpoint,
    pub jump: Endpoint,
    pub target: Endpoint,
    /// Run on the jump host while verifying preconditions
    pub test_command: String,
}

/// Per-machine settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub container_runner: String,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            container_runner: DEFAULT_CONTAINER_RUNNER.to_string(),
        }
    }
}

impl EnvironmentSettings {
    /// `~/.runp/settings.yaml`
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".runp").join("settings.yaml"))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read settings from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Env settings file not found, using defaults");
            return Self::default();
        }
        if !path.is_file() {
            warn!(path = %path.display(), "Invalid env settings file");
            return Self::default();
        }

        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| Self::from_yaml(&text))
        {
            Ok(settings) => {
                debug!(path = %path.display(), ?settings, "Loaded env settings");
                settings
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error loading env settings");
                Self::default()
            }
        }
    }

    /// Settings file plus the `RUNP_CONTAINER_RUNNER` override
    pub fn load() -> Self {
        let mut settings = match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Error resolving settings path, using defaults");
                Self::default()
            }
        };
        if let Ok(runner) = std::env::var(CONTAINER_RUNNER_ENV) {
            if !runner.is_empty() {
                settings.container_runner = runner;
            }
        }
        settings
    }
}
