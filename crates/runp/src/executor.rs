use crate::await_resource::wait_for;
use crate::context::RunContext;
use crate::platform_factory::PlatformShutdownFactory;
use crate::process::BoundUnit;
use runp_core::{
    ApplicationRegistry, CommandError, EnvironmentSettings, GracefulShutdown, OutputSink,
    OutputStream, Process, RunpError, Runpfile, SecretCipher, Templater,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Target child output is relayed under
pub const OUTPUT_TARGET: &str = "runp::output";

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Units left out by configuration errors or preconditions
    pub skipped: Vec<String>,
    /// Every failure recorded while the run lasted
    pub report: Vec<String>,
}

/// Drives every unit of a runpfile through its lifecycle
pub struct Executor {
    runpfile: Runpfile,
    units: Vec<BoundUnit>,
    registry: Arc<ApplicationRegistry>,
    settings: Option<EnvironmentSettings>,
    cipher: Option<Arc<dyn SecretCipher>>,
    templater: Option<Arc<dyn Templater>>,
    shutdown: Arc<dyn GracefulShutdown>,
}

impl Executor {
    pub fn new(mut runpfile: Runpfile, registry: Arc<ApplicationRegistry>) -> Self {
        runpfile.normalize();
        let units = runpfile.units.values().cloned().map(BoundUnit::new).collect();
        info!(
            "Created executor for {} units, shutdown protocol: {}",
            runpfile.units.len(),
            PlatformShutdownFactory::platform_name()
        );

        Self {
            runpfile,
            units,
            registry,
            settings: None,
            cipher: None,
            templater: None,
            shutdown: PlatformShutdownFactory::create_shutdown(),
        }
    }

    /// Use these settings instead of loading `~/.runp/settings.yaml`
    pub fn with_settings(mut self, settings: EnvironmentSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_templater(mut self, templater: Arc<dyn Templater>) -> Self {
        self.templater = Some(templater);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<dyn GracefulShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        &self.registry
    }

    async fn context(&self) -> RunContext {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => load_settings().await,
        };
        let mut context = RunContext::from_runpfile(&self.runpfile)
            .with_settings(settings)
            .with_shutdown(Arc::clone(&self.shutdown));
        if let Some(templater) = &self.templater {
            context = context.with_templater(Arc::clone(templater));
        }
        if let Some(cipher) = &self.cipher {
            context = context.with_cipher(Arc::clone(cipher));
        }
        context
    }

    /// Run every unit and block until all of them have finished
    pub async fn start(&mut self) -> RunSummary {
        let context = self.context().await;
        let width = self.runpfile.longest_unit_name();
        let mut skipped = Vec::new();

        let mut processes = Vec::with_capacity(self.units.len());
        for unit in self.units.iter_mut() {
            unit.bind(context.clone());
            match unit.process() {
                Ok(process) => processes.push(process),
                Err(e) => {
                    report_failure(&self.registry, unit.name(), "Error building process", &e);
                    skipped.push(unit.name().to_string());
                }
            }
        }

        let mut runnable = Vec::with_capacity(processes.len());
        for process in processes {
            let verdict = process.verify_preconditions().await;
            if verdict.is_proceed() {
                runnable.push(process);
                continue;
            }
            warn!(
                unit = %process.id(),
                vote = %verdict.vote,
                "Preconditions not satisfied: {}",
                verdict.reasons.join("; ")
            );
            skipped.push(process.id().to_string());
        }
        if !skipped.is_empty() {
            info!("Skipping units: {}", skipped.join(", "));
        }

        let mut tasks = JoinSet::new();
        for process in runnable {
            tasks.spawn(run_unit(process, Arc::clone(&self.registry), width));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Unit task panicked");
            }
        }

        RunSummary {
            skipped,
            report: self.registry.report(),
        }
    }
}

/// Read the settings file on the blocking pool
async fn load_settings() -> EnvironmentSettings {
    match tokio::task::spawn_blocking(EnvironmentSettings::load).await {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Loading env settings failed, using defaults");
            EnvironmentSettings::default()
        }
    }
}

/// Full lifecycle of one unit: register, build, await, probe, start, then
/// wait and relay output side by side
async fn run_unit(process: Arc<dyn Process>, registry: Arc<ApplicationRegistry>, width: usize) {
    let id = process.id().to_string();
    registry.register(Arc::clone(&process));

    let mut command = match process.start_command() {
        Ok(command) => command,
        Err(e) => {
            report_failure(&registry, &id, "Failed to build command for unit", &e);
            registry.deregister(&id);
            return;
        }
    };

    if process.should_wait() {
        if let Err(e) = wait_for(process.await_condition(), &id).await {
            report_failure(&registry, &id, "Error awaiting resource", &RunpError::from(e));
            registry.deregister(&id);
            return;
        }
    }

    match process.is_startable().await {
        Ok(true) => {}
        Ok(false) => {
            info!(unit = %id, "Process {} cannot be started", id);
            registry.deregister(&id);
            return;
        }
        Err(e) => {
            warn!(unit = %id, error = %e, "Failed to verify startability");
            registry.deregister(&id);
            return;
        }
    }

    let (sink, output) = OutputSink::channel();
    command.set_stdout(sink.clone());
    command.set_stderr(sink);

    debug!(unit = %id, "Starting {}", command.describe());
    if let Err(e) = command.start().await {
        report_failure(&registry, &id, "Failed to start process", &RunpError::from(e));
        registry.deregister(&id);
        return;
    }
    info!(unit = %id, pid = ?command.pid(), "Process started");

    tokio::join!(
        async {
            let result = command.wait().await;
            classify_exit(&registry, &id, result);
            registry.deregister(&id);
        },
        relay_output(output, &id, width),
    );
}

fn report_failure(registry: &ApplicationRegistry, id: &str, message: &str, e: &RunpError) {
    error!(unit = %id, kind = e.kind(), error = %e, "{}", message);
    registry.add_report(format!("{id}: {message}: {e}"));
}

/// Terminations caused by a stop are not failures. On Windows a forced kill
/// looks like a plain non-zero exit, so during shutdown any exit status is
/// accepted.
pub fn is_graceful_exit(error: &CommandError, shutting_down: bool) -> bool {
    error.is_termination_signal() || (shutting_down && error.is_exit_status())
}

fn classify_exit(registry: &ApplicationRegistry, id: &str, result: Result<(), CommandError>) {
    match result {
        Ok(()) => info!(unit = %id, "Process exited"),
        Err(e) if is_graceful_exit(&e, registry.is_shutting_down()) => {
            debug!(unit = %id, error = %e, "Process stopped");
        }
        Err(e) => {
            error!(unit = %id, kind = e.kind(), error = %e, "Process exited with error");
            registry.add_report(format!("{id}: {e} ({})", e.kind()));
        }
    }
}

async fn relay_output(mut output: OutputStream, id: &str, width: usize) {
    while let Some(line) = output.next_line().await {
        info!(target: OUTPUT_TARGET, "{id:>width$} | {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runp_core::{SIGINT, SIGKILL, SIGTERM};

    #[test]
    fn test_exit_classification() {
        for signal in [SIGINT, SIGKILL, SIGTERM] {
            let error = CommandError::Exited {
                code: None,
                signal: Some(signal),
            };
            assert!(is_graceful_exit(&error, false));
        }

        let shell_reported = CommandError::Exited {
            code: Some(128 + SIGTERM),
            signal: None,
        };
        assert!(is_graceful_exit(&shell_reported, false));

        let failed = CommandError::Exited {
            code: Some(1),
            signal: None,
        };
        assert!(!is_graceful_exit(&failed, false));
        assert!(is_graceful_exit(&failed, true));

        assert!(!is_graceful_exit(&CommandError::NotStarted, true));
    }

    #[tokio::test]
    async fn test_settings_load_off_the_runtime() {
        let settings = load_settings().await;
        assert!(!settings.container_runner.is_empty());
    }

    #[test]
    fn test_report_failure_records_unit() {
        let registry = ApplicationRegistry::new();
        report_failure(
            &registry,
            "web",
            "Failed to build command for unit",
            &RunpError::config("bad"),
        );
        assert_eq!(
            registry.report(),
            vec!["web: Failed to build command for unit: Configuration error: bad"]
        );
    }

    #[test]
    fn test_classify_exit_reports_only_failures() {
        let registry = ApplicationRegistry::new();
        classify_exit(&registry, "ok", Ok(()));
        classify_exit(
            &registry,
            "stopped",
            Err(CommandError::Exited {
                code: None,
                signal: Some(SIGTERM),
            }),
        );
        classify_exit(
            &registry,
            "broken",
            Err(CommandError::Exited {
                code: Some(2),
                signal: None,
            }),
        );
        assert_eq!(registry.report(), vec!["broken: exit status 2 (Exited)"]);
    }
}
