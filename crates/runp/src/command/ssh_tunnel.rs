use anyhow::{Context, bail};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use runp_core::{CommandError, CommandHandle, Endpoint, MultiError, OutputSink};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Synthetic pid reported by a tunnel
pub const TUNNEL_PID: i32 = -100;
/// Synthetic pid reported by a tunnel stopper
pub const TUNNEL_STOPPER_PID: i32 = -300;

/// One way of authenticating against the jump host
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    IdentityFile(PathBuf),
    Password(String),
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Resolved client side of a tunnel: who we are and how we prove it
#[derive(Debug, Clone, Default)]
pub struct SshClientConfig {
    pub user: String,
    pub auth: Vec<SshAuth>,
}

struct TunnelClient;

#[async_trait]
impl client::Handler for TunnelClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned.
        Ok(true)
    }
}

/// Open an authenticated session to `jump`. Methods are tried in order and
/// the first accepted one wins.
async fn connect(config: &SshClientConfig, jump: &Endpoint) -> anyhow::Result<Handle<TunnelClient>> {
    let ssh_config = Arc::new(client::Config::default());
    let mut session = client::connect(ssh_config, (jump.host_or_localhost(), jump.port), TunnelClient)
        .await
        .with_context(|| format!("connecting to {jump}"))?;

    for method in &config.auth {
        let accepted = match method {
            SshAuth::IdentityFile(path) => {
                let key_pair = russh_keys::load_secret_key(path, None)
                    .with_context(|| format!("loading identity file {}", path.display()))?;
                session
                    .authenticate_publickey(config.user.as_str(), Arc::new(key_pair))
                    .await?
            }
            SshAuth::Password(password) => {
                session
                    .authenticate_password(config.user.as_str(), password.as_str())
                    .await?
            }
        };
        if accepted {
            debug!(user = %config.user, jump = %jump, "Authenticated");
            return Ok(session);
        }
    }

    bail!("ssh: unable to authenticate user {:?} on {}", config.user, jump)
}

/// Run `command` on the jump host and return its output
pub async fn run_remote_command(
    config: &SshClientConfig,
    jump: &Endpoint,
    command: &str,
) -> anyhow::Result<String> {
    let session = connect(config, jump).await?;
    let mut channel = session.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut output = Vec::new();
    let mut exit_status = None;
    while let Some(message) = channel.wait().await {
        match message {
            ChannelMsg::Data { ref data } => output.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }
    if !session.is_closed() {
        let _ = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }

    let output = String::from_utf8_lossy(&output).into_owned();
    match exit_status {
        Some(0) => Ok(output),
        Some(code) => bail!("exit status {code}: {}", output.trim()),
        None => bail!("remote command ended without an exit status"),
    }
}

/// State shared between a tunnel and its stoppers
#[derive(Default)]
struct TunnelShared {
    cancel: CancellationToken,
    connections: Mutex<JoinSet<MultiError>>,
}

impl TunnelShared {
    fn connections(&self) -> MutexGuard<'_, JoinSet<MultiError>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `connection` until close. Connections that already finished are
    /// released first, their close errors are logged.
    fn track<F>(&self, connection: F)
    where
        F: Future<Output = MultiError> + Send + 'static,
    {
        let mut connections = self.connections();
        while let Some(finished) = connections.try_join_next() {
            match finished {
                Ok(errors) if !errors.is_empty() => {
                    debug!(error = %errors, "Released finished tunnel connection")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Tunnel connection task failed"),
            }
        }
        connections.spawn(connection);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.connections().len()
    }

    async fn close(&self) -> Result<(), CommandError> {
        self.cancel.cancel();

        let mut connections = std::mem::take(&mut *self.connections());
        let mut errors = MultiError::new();
        while let Some(joined) = connections.join_next().await {
            match joined {
                Ok(closed) => errors.extend(closed),
                Err(e) => errors.push(e),
            }
        }
        errors.into_result().map_err(CommandError::Close)
    }
}

/// Local TCP listener forwarding every connection to `target` through an
/// SSH session on `jump`
pub struct SshTunnel {
    id: String,
    config: Arc<SshClientConfig>,
    local: Endpoint,
    jump: Endpoint,
    target: Endpoint,
    shared: Arc<TunnelShared>,
    output: Option<OutputSink>,
}

impl SshTunnel {
    pub fn new(
        id: impl Into<String>,
        config: SshClientConfig,
        local: Endpoint,
        jump: Endpoint,
        target: Endpoint,
    ) -> Self {
        Self {
            id: id.into(),
            config: Arc::new(config),
            local,
            jump,
            target,
            shared: Arc::new(TunnelShared::default()),
            output: None,
        }
    }

    /// A handle that stops this tunnel from another task
    pub fn stopper(&self) -> TunnelStopper {
        TunnelStopper {
            id: self.id.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl CommandHandle for SshTunnel {
    fn pid(&self) -> Option<i32> {
        Some(TUNNEL_PID)
    }

    fn set_stdout(&mut self, sink: OutputSink) {
        self.output = Some(sink);
    }

    fn set_stderr(&mut self, sink: OutputSink) {
        self.output = Some(sink);
    }

    async fn start(&mut self) -> Result<(), CommandError> {
        let line = format!(
            "Starting SSH tunnel {} -> {} -> {}",
            self.local, self.jump, self.target
        );
        info!(unit = %self.id, "{}", line);
        // Nothing else is ever written, so the sink is released here.
        if let Some(sink) = self.output.take() {
            sink.write_line(line);
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), CommandError> {
        if self.shared.cancel.is_cancelled() {
            return Ok(());
        }

        let listener = TcpListener::bind((self.local.host_or_localhost(), self.local.port)).await?;
        debug!(unit = %self.id, local = %self.local, "Tunnel listening");

        loop {
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(unit = %self.id, peer = %peer, "Accepted tunnel connection");
                    self.shared.track(forward_connection(
                        stream,
                        Arc::clone(&self.config),
                        self.jump.clone(),
                        self.target.clone(),
                        self.shared.cancel.child_token(),
                    ));
                }
            }
        }

        debug!(unit = %self.id, "Tunnel stopped");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), CommandError> {
        self.shared.close().await
    }

    fn describe(&self) -> String {
        format!("ssh tunnel {} -> {} -> {}", self.local, self.jump, self.target)
    }
}

/// Stops a running [`SshTunnel`]; starting or running it stops too
#[derive(Clone)]
pub struct TunnelStopper {
    id: String,
    shared: Arc<TunnelShared>,
}

#[async_trait]
impl CommandHandle for TunnelStopper {
    fn pid(&self) -> Option<i32> {
        Some(TUNNEL_STOPPER_PID)
    }

    fn set_stdout(&mut self, _sink: OutputSink) {}

    fn set_stderr(&mut self, _sink: OutputSink) {}

    async fn start(&mut self) -> Result<(), CommandError> {
        self.stop().await
    }

    async fn wait(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<(), CommandError> {
        self.stop().await
    }

    async fn stop(&mut self) -> Result<(), CommandError> {
        debug!(unit = %self.id, "Stopping SSH tunnel");
        self.shared.close().await
    }

    fn describe(&self) -> String {
        format!("stop ssh tunnel {}", self.id)
    }
}

async fn forward_connection(
    mut local: TcpStream,
    config: Arc<SshClientConfig>,
    jump: Endpoint,
    target: Endpoint,
    cancel: CancellationToken,
) -> MultiError {
    let mut errors = MultiError::new();

    let session = tokio::select! {
        _ = cancel.cancelled() => None,
        connected = connect(&config, &jump) => match connected {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(jump = %jump, error = %e, "SSH connection failed");
                errors.push(e);
                None
            }
        },
    };

    if let Some(session) = session {
        let (origin_host, origin_port) = local
            .peer_addr()
            .map(|addr| (addr.ip().to_string(), u32::from(addr.port())))
            .unwrap_or_else(|_| ("127.0.0.1".to_string(), 0));

        match session
            .channel_open_direct_tcpip(
                target.host_or_localhost(),
                u32::from(target.port),
                origin_host,
                origin_port,
            )
            .await
        {
            Ok(channel) => {
                let mut remote = channel.into_stream();
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    copied = tokio::io::copy_bidirectional(&mut local, &mut remote) => match copied {
                        Ok((sent, received)) => debug!(target = %target, sent, received, "Tunnel connection finished"),
                        Err(e) => debug!(target = %target, error = %e, "Tunnel connection interrupted"),
                    },
                }
                if let Err(e) = remote.shutdown().await {
                    if !is_already_closed(&e) {
                        errors.push(anyhow::Error::from(e).context(format!("closing connection to {target}")));
                    }
                }
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Opening forwarded channel failed");
                errors.push(anyhow::Error::from(e).context(format!("opening channel to {target}")));
            }
        }

        if !session.is_closed() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                errors.push(anyhow::Error::from(e).context(format!("closing session to {jump}")));
            }
        }
    }

    if let Err(e) = local.shutdown().await {
        if !is_already_closed(&e) {
            errors.push(anyhow::Error::from(e).context("closing local connection"));
        }
    }
    errors
}

fn is_already_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}
