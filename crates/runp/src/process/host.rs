use super::{resolve_workdir, shell_invocation};
use crate::command::{ExecCommand, ExecCommandStopper, find_executable};
use crate::context::RunContext;
use async_trait::async_trait;
use runp_core::{
    AwaitCondition, CommandHandle, GracefulShutdown, HostSpec, LaunchState,
    PreconditionVerifyResult, Preconditions, Process, RunpError, SystemProbe, Unit, expand_env,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// What a host unit launches
#[derive(Debug, Clone, PartialEq)]
enum Launch {
    /// Looked up on `PATH` or in the working directory when the command is built
    Executable { name: String, args: Vec<String> },
    Shell { program: String, args: Vec<String> },
}

/// A plain command on this machine
pub struct HostProcess {
    id: String,
    dir: PathBuf,
    preconditions: Preconditions,
    system: Arc<dyn SystemProbe>,
    stop_timeout: Duration,
    await_condition: AwaitCondition,
    launch: Launch,
    env: Vec<(String, String)>,
    shutdown: Arc<dyn GracefulShutdown>,
    last_launch: Mutex<Option<LaunchState>>,
}

impl HostProcess {
    pub fn new(unit: &Unit, spec: &HostSpec, ctx: &RunContext) -> Self {
        let launch = if spec.executable.is_empty() {
            let (program, args) = shell_invocation(spec.shell.as_ref(), &ctx.process(&spec.command));
            Launch::Shell { program, args }
        } else {
            Launch::Executable {
                name: ctx.process(&spec.executable),
                args: spec.args.iter().map(|arg| ctx.process(arg)).collect(),
            }
        };

        let env = spec
            .env
            .iter()
            .map(|(key, value)| (key.clone(), expand_env(&ctx.process(value))))
            .collect();

        Self {
            id: unit.name.clone(),
            dir: resolve_workdir(&spec.workdir, ctx),
            preconditions: unit.preconditions.clone(),
            system: Arc::clone(&ctx.system),
            stop_timeout: unit.stop_timeout(),
            await_condition: spec.await_condition.clone(),
            launch,
            env,
            shutdown: Arc::clone(&ctx.shutdown),
            last_launch: Mutex::new(None),
        }
    }

    /// Program and arguments, resolving an explicit executable
    pub fn command_line(&self) -> Result<(String, Vec<String>), RunpError> {
        match &self.launch {
            Launch::Shell { program, args } => Ok((program.clone(), args.clone())),
            Launch::Executable { name, args } => {
                let path = find_executable(name, &self.dir).map_err(|tried| {
                    RunpError::ExecutableNotFound {
                        unit: self.id.clone(),
                        tried,
                    }
                })?;
                Ok((path.display().to_string(), args.clone()))
            }
        }
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }
}

#[async_trait]
impl Process for HostProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn preconditions(&self) -> &Preconditions {
        &self.preconditions
    }

    async fn verify_preconditions(&self) -> PreconditionVerifyResult {
        self.preconditions.verify(self.system.as_ref())
    }

    fn start_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        let (program, args) = self.command_line()?;
        debug!(unit = %self.id, program = %program, ?args, "Building host command");

        let command = ExecCommand::new(&self.id, program, args, Arc::clone(&self.shutdown))
            .with_dir(&self.dir)
            .with_env(self.env.iter().cloned())
            .with_stop_timeout(self.stop_timeout);

        let mut last = self
            .last_launch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(command.launch_state());
        Ok(Box::new(command))
    }

    fn stop_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        let launch = self
            .last_launch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_default();
        Ok(Box::new(ExecCommandStopper::new(
            &self.id,
            launch,
            Arc::clone(&self.shutdown),
            self.stop_timeout,
        )))
    }

    fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    fn await_condition(&self) -> &AwaitCondition {
        &self.await_condition
    }

    async fn is_startable(&self) -> Result<bool, RunpError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runp_core::CommandError;
    use std::collections::{BTreeMap, HashMap};

    fn unit(spec: HostSpec) -> Unit {
        Unit::builder()
            .name("api")
            .stop_timeout("2s")
            .spec(spec)
            .build()
            .unwrap()
    }

    fn context(root: &Path) -> RunContext {
        RunContext::new(
            HashMap::from([("greeting".to_string(), "hello".to_string())]),
            "",
            root.to_path_buf(),
        )
    }

    #[test]
    fn test_command_line_is_templated() {
        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec {
            command: "echo {{vars greeting}}".to_string(),
            ..Default::default()
        };
        let process = HostProcess::new(&unit(spec.clone()), &spec, &context(dir.path()));
        let (_, args) = process.command_line().unwrap();
        assert_eq!(args.last().map(String::as_str), Some("echo hello"));
        assert_eq!(process.stop_timeout(), Duration::from_secs(2));
        assert_eq!(process.dir(), dir.path());
    }

    #[test]
    fn test_env_is_templated_then_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec {
            command: "true".to_string(),
            env: BTreeMap::from([
                ("GREETING".to_string(), "{{vars greeting}}".to_string()),
                ("MISSING".to_string(), "${RUNP_TEST_SURELY_UNSET_VAR}x".to_string()),
            ]),
            ..Default::default()
        };
        let process = HostProcess::new(&unit(spec.clone()), &spec, &context(dir.path()));
        assert_eq!(
            process.env(),
            &[
                ("GREETING".to_string(), "hello".to_string()),
                ("MISSING".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_executable_fails_at_build_time() {
        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec {
            executable: "runp-no-such-program".to_string(),
            ..Default::default()
        };
        let process = HostProcess::new(&unit(spec.clone()), &spec, &context(dir.path()));
        match process.start_command() {
            Err(RunpError::ExecutableNotFound { unit, tried }) => {
                assert_eq!(unit, "api");
                assert_eq!(tried.len(), 2);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("command built for a missing executable"),
        }
    }

    #[tokio::test]
    async fn test_version_precondition_uses_runp_version() {
        use runp_core::preconditions::{RunpVersionPrecondition, VersionOperator};

        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec::default();
        let gated = |operator| {
            Unit::builder()
                .name("api")
                .preconditions(Preconditions {
                    runp: RunpVersionPrecondition {
                        operator: Some(operator),
                        version: crate::VERSION.to_string(),
                    },
                    ..Default::default()
                })
                .spec(spec.clone())
                .build()
                .unwrap()
        };

        let ctx = context(dir.path());
        assert_eq!(ctx.system.runp_version(), crate::VERSION);

        let equal = HostProcess::new(&gated(VersionOperator::Equal), &spec, &ctx);
        assert!(equal.verify_preconditions().await.is_proceed());
        let newer = HostProcess::new(&gated(VersionOperator::GreaterThan), &spec, &ctx);
        assert!(!newer.verify_preconditions().await.is_proceed());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec::default();
        let process = HostProcess::new(&unit(spec.clone()), &spec, &context(dir.path()));
        assert!(process.is_startable().await.unwrap());
        let mut stop = process.stop_command().unwrap();
        assert_eq!(stop.pid(), None);
        stop.run().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_and_stop_share_launch() {
        let dir = tempfile::tempdir().unwrap();
        let spec = HostSpec {
            executable: "sleep".to_string(),
            args: vec!["30".to_string()],
            ..Default::default()
        };
        let process = HostProcess::new(&unit(spec.clone()), &spec, &context(dir.path()));
        let mut start = process.start_command().unwrap();
        start.start().await.unwrap();

        let mut stop = process.stop_command().unwrap();
        assert_eq!(stop.pid(), start.pid());

        let (waited, stopped) = tokio::join!(start.wait(), stop.run());
        stopped.unwrap();
        assert!(matches!(waited, Err(ref e @ CommandError::Exited { .. }) if e.is_termination_signal()));
    }
}
