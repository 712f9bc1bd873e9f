use super::{resolve_workdir, shell_invocation};
use crate::command::{ExecCommand, ExecCommandStopper, capture_output};
use crate::context::RunContext;
use async_trait::async_trait;
use runp_core::{
    AwaitCondition, CommandHandle, ContainerSpec, GracefulShutdown, LaunchState,
    PreconditionVerifyResult, Preconditions, Process, RunpError, SystemProbe, Templater, Unit,
    expand_env,
};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Network every runp container joins
pub const RUNP_NETWORK: &str = "runp-network";

/// Full runner invocation for `spec`, before the final template pass
pub fn build_cmd_line(
    runner: &str,
    name: &str,
    spec: &ContainerSpec,
    templater: &dyn Templater,
) -> String {
    let mut line = format!("{runner} run -t");
    if !spec.skip_rm {
        line.push_str(" --rm");
    }
    let _ = write!(line, " --name {name} --network {RUNP_NETWORK}");
    if !spec.shm_size.is_empty() {
        let _ = write!(line, " --shm-size {}", spec.shm_size);
    }
    for volume in &spec.volumes {
        let _ = write!(line, " --volume {}", templater.process(volume));
    }
    for from in &spec.volumes_from {
        let _ = write!(line, " --volumes-from runp-{}", templater.process(from));
    }
    for mount in &spec.mounts {
        let _ = write!(line, " --mount {}", templater.process(mount));
    }
    if !spec.workdir.is_empty() {
        let _ = write!(line, " --workdir {}", spec.workdir);
    }
    for port in &spec.ports {
        let _ = write!(line, " -p {port}");
    }
    for (key, value) in &spec.env {
        let _ = write!(line, " -e \"{key}={}\"", expand_env(&templater.process(value)));
    }
    let _ = write!(line, " {}", spec.image);
    if !spec.command.is_empty() {
        let _ = write!(line, " {}", spec.command);
    }
    line
}

/// A container started through the configured runner
pub struct ContainerProcess {
    id: String,
    dir: PathBuf,
    preconditions: Preconditions,
    system: Arc<dyn SystemProbe>,
    stop_timeout: Duration,
    await_condition: AwaitCondition,
    runner: String,
    name: String,
    cmd_line: String,
    shutdown: Arc<dyn GracefulShutdown>,
    last_launch: Mutex<Option<LaunchState>>,
}

impl ContainerProcess {
    pub fn new(unit: &Unit, spec: &ContainerSpec, ctx: &RunContext) -> Self {
        let runner = ctx.settings.container_runner.clone();
        let name = if spec.name.is_empty() {
            format!("runp-{}", unit.name)
        } else {
            spec.name.clone()
        };
        let cmd_line = ctx.process(&build_cmd_line(&runner, &name, spec, ctx.templater.as_ref()));

        Self {
            id: unit.name.clone(),
            dir: resolve_workdir("", ctx),
            preconditions: unit.preconditions.clone(),
            system: Arc::clone(&ctx.system),
            stop_timeout: unit.stop_timeout(),
            await_condition: spec.await_condition.clone(),
            runner,
            name,
            cmd_line,
            shutdown: Arc::clone(&ctx.shutdown),
            last_launch: Mutex::new(None),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.name
    }

    pub fn cmd_line(&self) -> &str {
        &self.cmd_line
    }

    fn stop_cmd_line(&self) -> String {
        format!(
            "{} stop --time {} {}",
            self.runner,
            self.stop_timeout.as_secs(),
            self.name
        )
    }

    async fn ensure_network(&self) -> Result<(), String> {
        let filter = format!("name={RUNP_NETWORK}");
        let listed = capture_output(
            &self.runner,
            &[
                "network",
                "ls",
                "-q",
                "--filter",
                filter.as_str(),
                "--format",
                "{{ .Name }}",
            ],
            None,
        )
        .await
        .map_err(|e| format!("Error listing networks: {e}"))?;

        if listed.lines().any(|line| line.trim() == RUNP_NETWORK) {
            return Ok(());
        }

        info!(unit = %self.id, "Creating network {}", RUNP_NETWORK);
        capture_output(&self.runner, &["network", "create", RUNP_NETWORK], None)
            .await
            .map(|_| ())
            .map_err(|e| format!("Error creating network {RUNP_NETWORK}: {e}"))
    }
}

#[async_trait]
impl Process for ContainerProcess {
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
        let declared = self.preconditions.verify(self.system.as_ref());
        if !declared.is_proceed() {
            return declared;
        }
        match self.ensure_network().await {
            Ok(()) => declared,
            Err(reason) => PreconditionVerifyResult::stop([reason]),
        }
    }

    fn start_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        let (program, args) = shell_invocation(None, &self.cmd_line);
        debug!(unit = %self.id, cmd = %self.cmd_line, "Building container command");

        let command = ExecCommand::new(&self.id, program, args, Arc::clone(&self.shutdown))
            .with_dir(&self.dir)
            .with_stop_timeout(self.stop_timeout);
        let mut last = self
            .last_launch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(command.launch_state());
        Ok(Box::new(command))
    }

    fn stop_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        if self
            .last_launch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
        {
            // Never started here: nothing of ours to stop.
            return Ok(Box::new(ExecCommandStopper::new(
                &self.id,
                LaunchState::new(),
                Arc::clone(&self.shutdown),
                self.stop_timeout,
            )));
        }

        let (program, args) = shell_invocation(None, &self.stop_cmd_line());
        Ok(Box::new(
            ExecCommand::new(format!("{}-stop", self.id), program, args, Arc::clone(&self.shutdown))
                .with_dir(&self.dir),
        ))
    }

    fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    fn await_condition(&self) -> &AwaitCondition {
        &self.await_condition
    }

    async fn is_startable(&self) -> Result<bool, RunpError> {
        let filter = format!("name={}", self.name);
        let output =
            capture_output(&self.runner, &["ps", "-aq", "-f", filter.as_str()], None).await?;

        if output.trim().is_empty() {
            Ok(true)
        } else {
            info!(
                unit = %self.id,
                "Container {} already exists, remove it before starting", self.name
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runp_core::{EnvironmentSettings, VarsTemplater};
    use std::collections::{BTreeMap, HashMap};

    fn templater() -> VarsTemplater {
        VarsTemplater::new(HashMap::from([
            ("data".to_string(), "/srv/data".to_string()),
            ("tag".to_string(), "16".to_string()),
        ]))
    }

    fn context(runner: &str) -> RunContext {
        RunContext::new(
            HashMap::from([("tag".to_string(), "16".to_string())]),
            "",
            PathBuf::from("."),
        )
        .with_settings(EnvironmentSettings {
            container_runner: runner.to_string(),
        })
    }

    fn unit(spec: &ContainerSpec) -> Unit {
        Unit::builder()
            .name("db")
            .stop_timeout("10s")
            .spec(spec.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_minimal_cmd_line() {
        let spec = ContainerSpec {
            image: "postgres".to_string(),
            ..Default::default()
        };
        assert_eq!(
            build_cmd_line("docker", "runp-db", &spec, &templater()),
            "docker run -t --rm --name runp-db --network runp-network postgres"
        );
    }

    #[test]
    fn test_full_cmd_line() {
        let spec = ContainerSpec {
            image: "postgres:16".to_string(),
            skip_rm: true,
            shm_size: "256m".to_string(),
            volumes: vec!["{{vars data}}:/var/lib/postgresql/data".to_string()],
            volumes_from: vec!["cache".to_string()],
            mounts: vec!["type=tmpfs,destination=/tmp".to_string()],
            workdir: "/app".to_string(),
            ports: vec!["5432:5432".to_string()],
            env: BTreeMap::from([
                ("B_USER".to_string(), "admin".to_string()),
                ("A_PASSWORD".to_string(), "secret".to_string()),
            ]),
            command: "postgres -c fsync=off".to_string(),
            ..Default::default()
        };
        assert_eq!(
            build_cmd_line("podman", "pg", &spec, &templater()),
            "podman run -t --name pg --network runp-network --shm-size 256m \
             --volume /srv/data:/var/lib/postgresql/data --volumes-from runp-cache \
             --mount type=tmpfs,destination=/tmp --workdir /app -p 5432:5432 \
             -e \"A_PASSWORD=secret\" -e \"B_USER=admin\" postgres:16 postgres -c fsync=off"
        );
    }

    #[test]
    fn test_line_is_templated_again() {
        let spec = ContainerSpec {
            image: "postgres:{{vars tag}}".to_string(),
            ..Default::default()
        };
        let process = ContainerProcess::new(&unit(&spec), &spec, &context("docker"));
        assert_eq!(process.container_name(), "runp-db");
        assert!(process.cmd_line().ends_with(" postgres:16"));
        assert!(process.cmd_line().contains("--network runp-network"));
        assert_eq!(process.stop_cmd_line(), "docker stop --time 10 runp-db");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_container_is_not_startable() {
        // `echo` prints its arguments, which looks like a matching container id.
        let spec = ContainerSpec {
            image: "postgres".to_string(),
            ..Default::default()
        };
        let process = ContainerProcess::new(&unit(&spec), &spec, &context("echo"));
        assert!(!process.is_startable().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_runner_votes_stop() {
        let spec = ContainerSpec {
            image: "postgres".to_string(),
            ..Default::default()
        };
        let process = ContainerProcess::new(&unit(&spec), &spec, &context("false"));
        let result = process.verify_preconditions().await;
        assert!(!result.is_proceed());
        assert!(result.reasons[0].starts_with("Error listing networks"));
        assert!(process.is_startable().await.is_err());
    }
}
