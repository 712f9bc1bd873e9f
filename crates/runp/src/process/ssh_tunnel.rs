use super::resolve_workdir;
use crate::command::{SshAuth, SshClientConfig, SshTunnel, TunnelStopper, run_remote_command};
use crate::context::RunContext;
use async_trait::async_trait;
use runp_core::{
    AwaitCondition, CommandError, CommandHandle, Endpoint, PreconditionVerifyResult,
    Preconditions, Process, RunpError, SshTunnelSpec, SystemProbe, Unit, resolve_path,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Build the client config of a tunnel. Every configured auth method is
/// kept, in order: identity file, secret, encrypted secret.
pub fn resolve_client_config(
    spec: &SshTunnelSpec,
    ctx: &RunContext,
) -> Result<SshClientConfig, RunpError> {
    let mut auth = Vec::new();

    if !spec.auth.identity_file.is_empty() {
        let path = resolve_path(&ctx.process(&spec.auth.identity_file), &ctx.root);
        if !path.is_file() {
            return Err(RunpError::config(format!(
                "Invalid identity file {}",
                path.display()
            )));
        }
        auth.push(SshAuth::IdentityFile(path));
    }

    if !spec.auth.secret.is_empty() {
        auth.push(SshAuth::Password(ctx.process(&spec.auth.secret)));
    }

    if !spec.auth.encrypted_secret.is_empty() {
        if ctx.secret_key.is_empty() {
            return Err(RunpError::config(r#"Missing key for "encrypted_secret""#));
        }
        let cipher = ctx.cipher.as_ref().ok_or_else(|| {
            RunpError::config(r#"No cipher available to decrypt "encrypted_secret""#)
        })?;
        let secret = cipher
            .decrypt(&spec.auth.encrypted_secret, &ctx.secret_key)
            .map_err(|e| RunpError::config(format!(r#"Error decrypting "encrypted_secret": {e}"#)))?;
        auth.push(SshAuth::Password(secret));
    }

    if auth.is_empty() {
        return Err(RunpError::config("No Auth method set"));
    }

    Ok(SshClientConfig {
        user: ctx.process(&spec.user),
        auth,
    })
}

fn templated(endpoint: &Endpoint, ctx: &RunContext) -> Endpoint {
    Endpoint::new(ctx.process(&endpoint.host), endpoint.port)
}

/// A local port forwarded through a jump host
pub struct SshTunnelProcess {
    id: String,
    dir: PathBuf,
    preconditions: Preconditions,
    system: Arc<dyn SystemProbe>,
    stop_timeout: Duration,
    await_condition: AwaitCondition,
    config: SshClientConfig,
    local: Endpoint,
    jump: Endpoint,
    target: Endpoint,
    test_command: String,
    stopper: Mutex<Option<TunnelStopper>>,
}

impl SshTunnelProcess {
    pub fn new(unit: &Unit, spec: &SshTunnelSpec, ctx: &RunContext) -> Result<Self, RunpError> {
        let config = resolve_client_config(spec, ctx)?;
        Ok(Self {
            id: unit.name.clone(),
            dir: resolve_workdir(&spec.workdir, ctx),
            preconditions: unit.preconditions.clone(),
            system: Arc::clone(&ctx.system),
            stop_timeout: unit.stop_timeout(),
            await_condition: spec.await_condition.clone(),
            config,
            local: templated(&spec.local, ctx),
            jump: templated(&spec.jump, ctx),
            target: templated(&spec.target, ctx),
            test_command: ctx.process(&spec.test_command),
            stopper: Mutex::new(None),
        })
    }

    pub fn client_config(&self) -> &SshClientConfig {
        &self.config
    }
}

#[async_trait]
impl Process for SshTunnelProcess {
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
        if !declared.is_proceed() || self.test_command.is_empty() {
            return declared;
        }

        info!(unit = %self.id, jump = %self.jump, "Running test command");
        match run_remote_command(&self.config, &self.jump, &self.test_command).await {
            Ok(output) => {
                debug!(unit = %self.id, output = %output.trim(), "Test command succeeded");
                declared
            }
            Err(e) => PreconditionVerifyResult::stop([format!("Error executing test command: {e:#}")]),
        }
    }

    fn start_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        let tunnel = SshTunnel::new(
            &self.id,
            self.config.clone(),
            self.local.clone(),
            self.jump.clone(),
            self.target.clone(),
        );
        let mut stopper = self
            .stopper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopper = Some(tunnel.stopper());
        Ok(Box::new(tunnel))
    }

    fn stop_command(&self) -> Result<Box<dyn CommandHandle>, RunpError> {
        let stopper = self
            .stopper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(CommandError::NotStarted)?;
        Ok(Box::new(stopper))
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
