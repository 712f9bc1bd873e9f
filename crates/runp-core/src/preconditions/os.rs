use super::{Precondition, PreconditionVerifyResult, SystemProbe};
use serde::Deserialize;
use tracing::debug;

/// Allow-list of operating systems the unit may run on
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OsPrecondition {
    pub inclusions: Vec<String>,
}

/// Canonical os name; `macos` and `darwin` are the same platform
pub fn normalize_os(name: &str) -> String {
    match name.trim().to_ascii_lowercase().as_str() {
        "macos" | "osx" => "darwin".to_string(),
        other => other.to_string(),
    }
}

impl Precondition for OsPrecondition {
    fn is_set(&self) -> bool {
        !self.inclusions.is_empty()
    }

    fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult {
        let current = normalize_os(&probe.os());
        if self
            .inclusions
            .iter()
            .any(|included| normalize_os(included) == current)
        {
            debug!(os = %current, "Os precondition satisfied");
            return PreconditionVerifyResult::proceed();
        }

        PreconditionVerifyResult::stop([format!(
            "current os \"{current}\" not in {:?}",
            self.inclusions
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditions::Vote;
    use crate::preconditions::tests::FakeSystem;

    fn on(os: &str) -> FakeSystem {
        FakeSystem {
            os: os.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_os_included() {
        let precondition = OsPrecondition {
            inclusions: vec!["linux".to_string(), "windows".to_string()],
        };
        assert!(precondition.is_set());
        assert!(precondition.verify(&on("linux")).is_proceed());
    }

    #[test]
    fn test_os_excluded() {
        let precondition = OsPrecondition {
            inclusions: vec!["windows".to_string()],
        };
        let result = precondition.verify(&on("linux"));
        assert_eq!(result.vote, Vote::Stop);
        assert_eq!(
            result.reasons,
            vec![r#"current os "linux" not in ["windows"]"#.to_string()]
        );
    }

    #[test]
    fn test_macos_alias() {
        let precondition = OsPrecondition {
            inclusions: vec!["macos".to_string()],
        };
        assert!(precondition.verify(&on("darwin")).is_proceed());
    }

    #[test]
    fn test_empty_is_not_set() {
        assert!(!OsPrecondition::default().is_set());
    }
}
