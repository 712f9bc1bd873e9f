//! runp core - platform-independent model of a run
//!
//! Unit configuration, the process and command traits, precondition voting,
//! the shutdown protocol trait, the application registry and templating.

mod config;
mod duration;
mod error;
pub mod preconditions;
mod process;
mod registry;
mod secret;
mod shutdown;
mod template;

pub use config::*;
pub use duration::parse_duration;
pub use error::*;
pub use preconditions::{LiveSystem, PreconditionVerifyResult, Preconditions, SystemProbe, Vote};
pub use process::*;
pub use registry::ApplicationRegistry;
pub use secret::SecretCipher;
pub use shutdown::*;
pub use template::*;
