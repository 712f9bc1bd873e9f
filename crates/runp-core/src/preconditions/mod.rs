//! Precondition voting
//!
//! Every configured check casts a [`Vote`]. Checks that are not configured
//! report [`Vote::Unknown`] and are left out of the tally. The aggregate is
//! [`Vote::Proceed`] unless at least one configured check votes
//! [`Vote::Stop`], in which case the reasons of every failing check are
//! concatenated in declaration order.

mod env_vars;
mod hosts;
mod os;
mod probe;
mod version;

pub use env_vars::{EnvVarCheck, EnvVarCondition, EnvVarsPrecondition};
pub use hosts::{EtcHostsPrecondition, parse_etc_hosts};
pub use os::{OsPrecondition, normalize_os};
pub use probe::{LiveSystem, SystemProbe};
pub use version::{RunpVersionPrecondition, Version, VersionOperator};

use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vote {
    #[default]
    Unknown,
    Stop,
    Proceed,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Vote::Unknown => "Unknown",
            Vote::Stop => "Stop",
            Vote::Proceed => "Proceed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreconditionVerifyResult {
    pub vote: Vote,
    pub reasons: Vec<String>,
}

impl PreconditionVerifyResult {
    pub fn proceed() -> Self {
        Self {
            vote: Vote::Proceed,
            reasons: Vec::new(),
        }
    }

    pub fn stop<S: Into<String>, I: IntoIterator<Item = S>>(reasons: I) -> Self {
        Self {
            vote: Vote::Stop,
            reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_proceed(&self) -> bool {
        self.vote == Vote::Proceed
    }
}

/// A single pluggable gate check
pub trait Precondition {
    /// Whether the check was configured at all
    fn is_set(&self) -> bool;

    fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult;
}

/// Tally individual results into one vote
pub fn aggregate<I>(results: I) -> PreconditionVerifyResult
where
    I: IntoIterator<Item = PreconditionVerifyResult>,
{
    let mut stopped = false;
    let mut reasons = Vec::new();
    for result in results {
        match result.vote {
            Vote::Unknown | Vote::Proceed => {}
            Vote::Stop => {
                stopped = true;
                reasons.extend(result.reasons);
            }
        }
    }

    if stopped {
        PreconditionVerifyResult::stop(reasons)
    } else {
        PreconditionVerifyResult::proceed()
    }
}

/// The precondition set declared on a unit
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Preconditions {
    pub os: OsPrecondition,
    pub runp: RunpVersionPrecondition,
    pub hosts: EtcHostsPrecondition,
    pub env_vars: EnvVarsPrecondition,
}

impl Preconditions {
    fn checks(&self) -> [&dyn Precondition; 4] {
        [&self.os, &self.runp, &self.hosts, &self.env_vars]
    }

    pub fn is_empty(&self) -> bool {
        self.checks().iter().all(|check| !check.is_set())
    }

    /// Run every configured check against `probe` without short-circuiting
    pub fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult {
        aggregate(self.checks().into_iter().map(|check| {
            if check.is_set() {
                check.verify(probe)
            } else {
                PreconditionVerifyResult::unknown()
            }
        }))
    }
}
