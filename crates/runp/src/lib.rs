//! runp - run a set of local processes, containers and SSH tunnels together
//!
//! The [`Executor`] binds every unit of a [`Runpfile`](runp_core::Runpfile)
//! to a process, gates it on its preconditions, waits for the resources it
//! declares and then runs all units concurrently, relaying their output.
//! [`spawn_shutdown_listener`] stops whatever is still running on interrupt.

pub mod await_resource;
pub mod command;
mod context;
mod executor;
pub mod logging;
mod platform_factory;
pub mod process;
mod signal;

pub use context::RunContext;
pub use executor::{Executor, OUTPUT_TARGET, RunSummary, is_graceful_exit};
pub use logging::{LogFormat, init_logging};
pub use platform_factory::{PlatformShutdown, PlatformShutdownFactory};
pub use signal::{shutdown_running_processes, spawn_shutdown_listener};

// Re-export the core model so embedders need a single dependency
pub use runp_core;

/// Version checked by `runp` preconditions
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
