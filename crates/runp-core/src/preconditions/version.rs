use super::{Precondition, PreconditionVerifyResult, SystemProbe};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VersionOperator {
    #[serde(alias = "<")]
    LessThan,
    #[serde(alias = "<=")]
    LessThanOrEqual,
    #[serde(alias = "=", alias = "==")]
    Equal,
    #[serde(alias = ">=")]
    GreaterThanOrEqual,
    #[serde(alias = ">")]
    GreaterThan,
}

impl VersionOperator {
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            VersionOperator::LessThan => ordering == Ordering::Less,
            VersionOperator::LessThanOrEqual => ordering != Ordering::Greater,
            VersionOperator::Equal => ordering == Ordering::Equal,
            VersionOperator::GreaterThanOrEqual => ordering != Ordering::Less,
            VersionOperator::GreaterThan => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for VersionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionOperator::LessThan => "LessThan",
            VersionOperator::LessThanOrEqual => "LessThanOrEqual",
            VersionOperator::Equal => "Equal",
            VersionOperator::GreaterThanOrEqual => "GreaterThanOrEqual",
            VersionOperator::GreaterThan => "GreaterThan",
        };
        f.write_str(name)
    }
}

/// Dotted numeric version. A leading `v` and any pre-release or build
/// suffix are ignored; missing components compare as zero.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            anyhow::bail!("Malformed version: \"{input}\"");
        }

        let parts = core
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| anyhow::anyhow!("Malformed version: \"{input}\""))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self(parts))
    }

    fn component(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Compares the running runp version with a declared one
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunpVersionPrecondition {
    pub operator: Option<VersionOperator>,
    pub version: String,
}

impl Precondition for RunpVersionPrecondition {
    fn is_set(&self) -> bool {
        self.operator.is_some() && !self.version.is_empty()
    }

    fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult {
        let current = match Version::parse(&probe.runp_version()) {
            Ok(v) => v,
            Err(e) => {
                return PreconditionVerifyResult::stop([format!(
                    "error getting current version {e}"
                )]);
            }
        };
        let target = match Version::parse(&self.version) {
            Ok(v) => v,
            Err(e) => return PreconditionVerifyResult::stop([format!("error parsing version {e}")]),
        };
        let Some(operator) = self.operator else {
            return PreconditionVerifyResult::unknown();
        };

        if operator.matches(current.cmp(&target)) {
            debug!(%current, %operator, %target, "Runp version precondition satisfied");
            return PreconditionVerifyResult::proceed();
        }

        PreconditionVerifyResult::stop([format!(
            "version \"{current}\" is not {operator} {target}"
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditions::Vote;
    use crate::preconditions::tests::FakeSystem;

    fn running(version: &str) -> FakeSystem {
        FakeSystem {
            version: version.to_string(),
            ..Default::default()
        }
    }

    fn check(operator: VersionOperator, version: &str) -> RunpVersionPrecondition {
        RunpVersionPrecondition {
            operator: Some(operator),
            version: version.to_string(),
        }
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::parse("1.10.0").unwrap() > Version::parse("1.9.9").unwrap());
        assert_eq!(Version::parse("v1.2").unwrap(), Version::parse("1.2.0").unwrap());
        assert_eq!(
            Version::parse("1.2.3-rc1").unwrap(),
            Version::parse("1.2.3").unwrap()
        );
        assert!(Version::parse("one.two").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_operators() {
        let system = running("1.5.0");
        assert!(check(VersionOperator::GreaterThan, "1.0.0").verify(&system).is_proceed());
        assert!(check(VersionOperator::GreaterThanOrEqual, "1.5").verify(&system).is_proceed());
        assert!(check(VersionOperator::Equal, "1.5.0").verify(&system).is_proceed());
        assert!(check(VersionOperator::LessThanOrEqual, "1.5.0").verify(&system).is_proceed());
        assert!(check(VersionOperator::LessThan, "2").verify(&system).is_proceed());
    }

    #[test]
    fn test_unsatisfied_operator_reports_reason() {
        let result = check(VersionOperator::LessThan, "1.0.0").verify(&running("1.5.0"));
        assert_eq!(result.vote, Vote::Stop);
        assert_eq!(result.reasons, vec![r#"version "1.5.0" is not LessThan 1.0.0"#]);
    }

    #[test]
    fn test_malformed_target_stops() {
        let result = check(VersionOperator::Equal, "latest").verify(&running("1.5.0"));
        assert_eq!(result.vote, Vote::Stop);
        assert!(result.reasons[0].starts_with("error parsing version"));
    }

    #[test]
    fn test_symbolic_operator_aliases() {
        let parsed: RunpVersionPrecondition =
            serde_json::from_str(r#"{"operator": "<=", "version": "2.0"}"#).unwrap();
        assert_eq!(parsed.operator, Some(VersionOperator::LessThanOrEqual));
        assert!(parsed.is_set());
        assert!(!RunpVersionPrecondition::default().is_set());
    }
}
