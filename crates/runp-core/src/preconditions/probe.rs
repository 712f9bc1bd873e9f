/// Read-only view of the machine that preconditions are evaluated against
pub trait SystemProbe: Send + Sync {
    /// Operating system name: `linux`, `darwin`, `windows`, ...
    fn os(&self) -> String;

    fn env_var(&self, name: &str) -> Option<String>;

    fn read_hosts_file(&self) -> std::io::Result<String>;

    fn runp_version(&self) -> String;
}

/// The machine runp is running on. `version` is the one of the running
/// binary, supplied by the caller.
#[derive(Debug, Clone)]
pub struct LiveSystem {
    version: String,
}

impl LiveSystem {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    fn hosts_path() -> &'static str {
        if cfg!(windows) {
            r"c:\Windows\System32\Drivers\etc\hosts"
        } else {
            "/etc/hosts"
        }
    }
}

impl SystemProbe for LiveSystem {
    fn os(&self) -> String {
        super::normalize_os(std::env::consts::OS)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn read_hosts_file(&self) -> std::io::Result<String> {
        std::fs::read_to_string(Self::hosts_path())
    }

    fn runp_version(&self) -> String {
        self.version.clone()
    }
}
