//! Process variants bound from unit specs.

mod container;
mod host;
mod ssh_tunnel;

pub use container::{ContainerProcess, RUNP_NETWORK, build_cmd_line};
pub use host::HostProcess;
pub use ssh_tunnel::{SshTunnelProcess, resolve_client_config};

use crate::context::RunContext;
use runp_core::{ProcessSpec, Process, RunpError, Shell, Unit, resolve_path};
use std::path::PathBuf;
use std::sync::Arc;

/// Turn a unit into its runtime process
pub fn build_process(unit: &Unit, ctx: &RunContext) -> Result<Arc<dyn Process>, RunpError> {
    let process: Arc<dyn Process> = match &unit.spec {
        ProcessSpec::Host(spec) => Arc::new(HostProcess::new(unit, spec, ctx)),
        ProcessSpec::Container(spec) => Arc::new(ContainerProcess::new(unit, spec, ctx)),
        ProcessSpec::SshTunnel(spec) => Arc::new(SshTunnelProcess::new(unit, spec, ctx)?),
    };
    Ok(process)
}

/// A unit together with the context it runs in and its memoized process
pub struct BoundUnit {
    unit: Unit,
    context: Option<RunContext>,
    process: Option<Arc<dyn Process>>,
}

impl BoundUnit {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            context: None,
            process: None,
        }
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// Bind a context; the next `process()` call rebuilds with it
    pub fn bind(&mut self, context: RunContext) {
        self.context = Some(context);
        self.process = None;
    }

    pub fn process(&mut self) -> Result<Arc<dyn Process>, RunpError> {
        if let Some(process) = &self.process {
            return Ok(Arc::clone(process));
        }
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| RunpError::config(format!("unit {} is not bound", self.unit.name)))?;
        let process = build_process(&self.unit, context)?;
        self.process = Some(Arc::clone(&process));
        Ok(process)
    }
}

/// The shell command lines run through when none is configured
pub fn default_shell() -> Shell {
    #[cfg(windows)]
    {
        Shell {
            path: "cmd".to_string(),
            args: vec!["/C".to_string()],
        }
    }

    #[cfg(not(windows))]
    {
        Shell {
            path: "bash".to_string(),
            args: ["--noprofile", "--norc", "-eo", "pipefail", "-c"]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

/// Program and arguments running `command_line` through `shell`. The command
/// line is always the last argument, even when empty.
pub fn shell_invocation(shell: Option<&Shell>, command_line: &str) -> (String, Vec<String>) {
    let shell = match shell {
        Some(shell) if !shell.path.is_empty() => shell.clone(),
        _ => default_shell(),
    };
    let mut args = shell.args;
    args.push(command_line.to_string());
    (shell.path, args)
}

/// Working directory of a host-side unit: templated, expanded, anchored at
/// the runpfile root
pub(crate) fn resolve_workdir(workdir: &str, ctx: &RunContext) -> PathBuf {
    let workdir = ctx.process(workdir);
    if workdir.is_empty() {
        ctx.root.clone()
    } else {
        resolve_path(&workdir, &ctx.root)
    }
}
