use runp_core::ApplicationRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Stop every registered process. Works on a snapshot so units finishing
/// meanwhile are not a problem. Errors are logged, never returned.
pub async fn shutdown_running_processes(registry: &ApplicationRegistry) {
    let running = registry.running_processes();
    info!("Stopping {} running processes", running.len());

    for process in running {
        let id = process.id().to_string();
        let mut stop = match process.stop_command() {
            Ok(stop) => stop,
            Err(e) => {
                warn!(unit = %id, kind = e.kind(), error = %e, "Error building stop command");
                continue;
            }
        };
        debug!(unit = %id, "Running {}", stop.describe());
        if let Err(e) = stop.run().await {
            error!(unit = %id, kind = e.kind(), error = %e, "Error stopping process");
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C is handled");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Start the detached task owning the interrupt path: on Ctrl-C (or SIGTERM
/// on Unix) it flags the shutdown, stops everything still running and exits
/// the process with status 0.
pub fn spawn_shutdown_listener(registry: Arc<ApplicationRegistry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Interrupt received, shutting down");
        registry.set_shutting_down();
        shutdown_running_processes(&registry).await;
        info!("Shutdown complete");
        std::process::exit(0);
    })
}
