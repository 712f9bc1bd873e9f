use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static VARS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*vars\s+([a-z_]+)\s*\}\}").expect("vars pattern is valid")
});

static ENV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("env pattern is valid")
});

/// Text substitution bound to the current variables
pub trait Templater: Send + Sync {
    fn process(&self, input: &str) -> String;
}

/// Replaces `{{vars name}}` with the named variable. Unknown names are
/// rendered as `{!notfound key 'name'!}` so the mistake shows up in output.
#[derive(Debug, Clone, Default)]
pub struct VarsTemplater {
    vars: HashMap<String, String>,
}

impl VarsTemplater {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }
}

impl Templater for VarsTemplater {
    fn process(&self, input: &str) -> String {
        VARS_PATTERN
            .replace_all(input, |caps: &Captures| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => format!("{{!notfound key '{}'!}}", &caps[1]),
            })
            .into_owned()
    }
}

/// Expand `$VAR` and `${VAR}` using `lookup`; unset variables expand to
/// the empty string
pub fn expand_env_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PATTERN
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

pub fn expand_env(input: &str) -> String {
    expand_env_with(input, |name| std::env::var(name).ok())
}

/// Replace a leading `~` with the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Expand env vars and `~`, then anchor relative paths at `root`
pub fn resolve_path(path: &str, root: &Path) -> PathBuf {
    let expanded = expand_home(&expand_env(path));
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}
