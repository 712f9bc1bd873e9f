//! Command handles: local OS commands, their stoppers, and SSH tunnels.

pub mod exec;
pub mod ssh_tunnel;

pub use exec::{ExecCommand, ExecCommandStopper, capture_output, find_executable};
pub use ssh_tunnel::{
    SshAuth, SshClientConfig, SshTunnel, TUNNEL_PID, TUNNEL_STOPPER_PID, TunnelStopper,
    run_remote_command,
};
