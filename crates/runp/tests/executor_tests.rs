use runp::runp_core::{ApplicationRegistry, EnvironmentSettings, Runpfile};
use runp::{Executor, RunSummary, shutdown_running_processes};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

fn runpfile(root: &Path, units: serde_json::Value) -> Runpfile {
    let mut runpfile: Runpfile = serde_json::from_value(json!({
        "name": "test",
        "vars": { "marker": "sibling" },
        "units": units,
    }))
    .unwrap();
    runpfile.root = root.to_path_buf();
    runpfile
}

fn executor(runpfile: Runpfile, registry: &Arc<ApplicationRegistry>) -> Executor {
    Executor::new(runpfile, Arc::clone(registry)).with_settings(EnvironmentSettings::default())
}

async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[cfg(unix)]
#[tokio::test]
async fn test_precondition_stop_skips_only_that_unit() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "excluded": {
            "preconditions": { "os": { "inclusions": ["plan9"] } },
            "host": { "command": "touch excluded" }
        },
        "sibling": {
            "host": { "command": "touch {{vars marker}}" }
        }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert_eq!(summary.skipped, vec!["excluded"]);
    assert!(summary.report.is_empty(), "{:?}", summary.report);
    assert!(dir.path().join("sibling").exists());
    assert!(!dir.path().join("excluded").exists());
    assert!(registry.running_ids().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_colliding_container_is_not_started() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "db": { "container": { "image": "postgres" } }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    // `echo` answers every `ps` query, so the container looks taken.
    let summary = Executor::new(runpfile(dir.path(), units), Arc::clone(&registry))
        .with_settings(EnvironmentSettings {
            container_runner: "echo".to_string(),
        })
        .start()
        .await;

    assert_eq!(summary, RunSummary::default());
    assert!(registry.running_ids().is_empty());
}

#[tokio::test]
async fn test_encrypted_secret_without_key_is_a_config_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "tunnel": {
            "ssh_tunnel": {
                "user": "deploy",
                "auth": { "encrypted_secret": "c2VjcmV0" },
                "local": { "port": 15432 },
                "jump": { "host": "bastion.example.com", "port": 22 },
                "target": { "host": "db.internal", "port": 5432 }
            }
        }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert_eq!(summary.skipped, vec!["tunnel"]);
    assert_eq!(summary.report.len(), 1);
    assert!(summary.report[0].contains(r#"Missing key for "encrypted_secret""#));
}

#[tokio::test]
async fn test_missing_executable_is_reported() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "tool": { "host": { "executable": "runp-no-such-tool" } }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert!(summary.skipped.is_empty());
    assert_eq!(summary.report.len(), 1);
    assert!(summary.report[0].starts_with("tool: Failed to build command for unit"));
    assert!(summary.report[0].contains("Executable for process tool not found"));
    assert!(registry.running_ids().is_empty());
}

#[tokio::test]
async fn test_invalid_await_timeout_is_reported() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "web": { "host": { "command": "exit 0", "await": { "timeout": "soon" } } }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert_eq!(summary.report.len(), 1);
    assert!(summary.report[0].contains("Invalid duration format"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_unit_is_reported() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "broken": { "host": { "command": "echo failing; exit 3" } },
        "fine": { "host": { "command": "echo fine" } }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert_eq!(summary.report, vec!["broken: exit status 3 (Exited)"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_latin1_output_does_not_fail_unit() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let units = json!({
        "latin1": {
            "host": {
                "command": "printf 'caf\\351\\n'; sleep 0.5; for i in 1 2 3 4 5; do echo after $i; done; exit 0"
            }
        }
    });
    let registry = Arc::new(ApplicationRegistry::new());

    let summary = executor(runpfile(dir.path(), units), &registry).start().await;

    assert_eq!(summary, RunSummary::default());
}

#[tokio::test]
async fn test_sibling_finishes_while_other_awaits() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let port = closed_port();
    let units = json!({
        "waiting": {
            "host": {
                "command": "exit 0",
                "await": { "resource": format!("tcp://127.0.0.1:{port}"), "timeout": "3s" }
            }
        },
        "quick": { "host": { "command": "exit 0" } }
    });
    let registry = Arc::new(ApplicationRegistry::new());
    let mut executor = executor(runpfile(dir.path(), units), &registry);

    let started = Instant::now();
    let run = tokio::spawn(async move { executor.start().await });

    assert!(
        wait_until(|| registry.contains("waiting"), Duration::from_secs(1)).await,
        "waiting unit never registered"
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(registry.running_ids(), vec!["waiting"]);
    assert!(!run.is_finished());

    let summary = run.await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(summary.report.len(), 1);
    assert!(summary.report[0].starts_with("waiting: Error awaiting resource"));
    assert!(registry.running_ids().is_empty());
}

#[cfg(unix)]
async fn start_and_interrupt(units: serde_json::Value, unit: &str) -> (RunSummary, Duration) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ApplicationRegistry::new());
    let mut executor = executor(runpfile(dir.path(), units), &registry);
    let run = tokio::spawn(async move { executor.start().await });

    let launched = wait_until(
        || {
            registry
                .running_processes()
                .iter()
                .filter(|process| process.id() == unit)
                .any(|process| {
                    process
                        .stop_command()
                        .map(|stop| stop.pid().is_some())
                        .unwrap_or(false)
                })
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(launched, "{unit} never started");
    // Give the shell time to install its traps.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopping = Instant::now();
    registry.set_shutting_down();
    shutdown_running_processes(&registry).await;
    let stop_took = stopping.elapsed();

    let summary = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert!(registry.running_ids().is_empty());
    (summary, stop_took)
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupt_terminates_sleeping_unit() {
    init_tracing();
    let units = json!({
        "sleeper": { "host": { "command": "sleep 30" } }
    });

    let (summary, stop_took) = start_and_interrupt(units, "sleeper").await;

    assert!(summary.report.is_empty(), "{:?}", summary.report);
    assert!(stop_took < Duration::from_secs(5));
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupt_escalates_to_kill() {
    init_tracing();
    let units = json!({
        "stubborn": {
            "stop_timeout": "500ms",
            "host": { "command": "trap '' TERM; while true; do sleep 0.1; done" }
        }
    });

    let (summary, stop_took) = start_and_interrupt(units, "stubborn").await;

    assert!(summary.report.is_empty(), "{:?}", summary.report);
    assert!(stop_took >= Duration::from_millis(500));
}
