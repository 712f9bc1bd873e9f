use super::{Precondition, PreconditionVerifyResult, SystemProbe};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVarCondition {
    IsSet,
    IsUnset,
    IsEqual,
}

impl EnvVarCondition {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "is_set" => Some(EnvVarCondition::IsSet),
            "is_unset" => Some(EnvVarCondition::IsUnset),
            "is_equal" | "equals" => Some(EnvVarCondition::IsEqual),
            _ => None,
        }
    }
}

/// One check on an environment variable. Kept loosely typed so that a
/// malformed entry turns into a reason instead of a load error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnvVarCheck {
    pub name: String,
    pub condition: String,
    pub value: String,
}

impl EnvVarCheck {
    pub fn new(name: impl Into<String>, condition: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
            value: value.into(),
        }
    }

    fn verify(&self, probe: &dyn SystemProbe) -> Option<String> {
        let name = &self.name;
        if name.is_empty() {
            return Some("Environment variable check missing 'name' field".to_string());
        }
        if self.condition.is_empty() {
            return Some(format!(
                "Environment variable '{name}' missing 'condition' field"
            ));
        }
        let Some(condition) = EnvVarCondition::parse(&self.condition) else {
            return Some(format!(
                "Invalid condition '{}' for environment variable '{name}'",
                self.condition
            ));
        };
        if condition == EnvVarCondition::IsEqual && self.value.is_empty() {
            return Some(format!(
                "Environment variable '{name}' requires 'value' field when using condition 'is_equal'"
            ));
        }

        let current = probe.env_var(name).unwrap_or_default();
        match condition {
            EnvVarCondition::IsSet if current.is_empty() => {
                Some(format!("Environment variable '{name}' is not set"))
            }
            EnvVarCondition::IsUnset if !current.is_empty() => Some(format!(
                "Environment variable '{name}' is set but should be unset (current value: '{current}')"
            )),
            EnvVarCondition::IsEqual if current.is_empty() => {
                Some(format!("Environment variable '{name}' is not set"))
            }
            EnvVarCondition::IsEqual if current != self.value => Some(format!(
                "Environment variable '{name}' has value '{current}' but expected '{}'",
                self.value
            )),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvVarsRepr {
    List(Vec<EnvVarCheck>),
    Wrapped { env_vars: Vec<EnvVarCheck> },
}

impl From<EnvVarsRepr> for EnvVarsPrecondition {
    fn from(repr: EnvVarsRepr) -> Self {
        let checks = match repr {
            EnvVarsRepr::List(checks) => checks,
            EnvVarsRepr::Wrapped { env_vars } => env_vars,
        };
        Self { checks }
    }
}

/// Environment variable state checks, written either as a bare list or
/// wrapped as `{ env_vars: [...] }`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "EnvVarsRepr")]
pub struct EnvVarsPrecondition {
    pub checks: Vec<EnvVarCheck>,
}

impl Precondition for EnvVarsPrecondition {
    fn is_set(&self) -> bool {
        !self.checks.is_empty()
    }

    fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult {
        let reasons: Vec<String> = self
            .checks
            .iter()
            .filter_map(|check| check.verify(probe))
            .collect();

        if reasons.is_empty() {
            PreconditionVerifyResult::proceed()
        } else {
            PreconditionVerifyResult::stop(reasons)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditions::Vote;
    use crate::preconditions::tests::FakeSystem;
    use std::collections::HashMap;

    fn system() -> FakeSystem {
        FakeSystem {
            env: HashMap::from([
                ("APP_ENV".to_string(), "staging".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]),
            ..Default::default()
        }
    }

    fn verify(checks: Vec<EnvVarCheck>) -> PreconditionVerifyResult {
        EnvVarsPrecondition { checks }.verify(&system())
    }

    #[test]
    fn test_satisfied_checks() {
        let result = verify(vec![
            EnvVarCheck::new("APP_ENV", "is_set", ""),
            EnvVarCheck::new("MISSING", "is_unset", ""),
            EnvVarCheck::new("EMPTY", "is_unset", ""),
            EnvVarCheck::new("APP_ENV", "is_equal", "staging"),
            EnvVarCheck::new("APP_ENV", "equals", "staging"),
        ]);
        assert!(result.is_proceed());
    }

    #[test]
    fn test_every_failure_is_reported() {
        let result = verify(vec![
            EnvVarCheck::new("", "is_set", ""),
            EnvVarCheck::new("APP_ENV", "", ""),
            EnvVarCheck::new("APP_ENV", "is_equal", ""),
            EnvVarCheck::new("APP_ENV", "is_big", ""),
            EnvVarCheck::new("MISSING", "is_set", ""),
            EnvVarCheck::new("APP_ENV", "is_unset", ""),
            EnvVarCheck::new("APP_ENV", "is_equal", "production"),
        ]);
        assert_eq!(result.vote, Vote::Stop);
        assert_eq!(
            result.reasons,
            vec![
                "Environment variable check missing 'name' field",
                "Environment variable 'APP_ENV' missing 'condition' field",
                "Environment variable 'APP_ENV' requires 'value' field when using condition 'is_equal'",
                "Invalid condition 'is_big' for environment variable 'APP_ENV'",
                "Environment variable 'MISSING' is not set",
                "Environment variable 'APP_ENV' is set but should be unset (current value: 'staging')",
                "Environment variable 'APP_ENV' has value 'staging' but expected 'production'",
            ]
        );
    }

    #[test]
    fn test_list_and_wrapped_forms() {
        let list: EnvVarsPrecondition =
            serde_json::from_str(r#"[{"name": "A", "condition": "is_set"}]"#).unwrap();
        let wrapped: EnvVarsPrecondition =
            serde_json::from_str(r#"{"env_vars": [{"name": "A", "condition": "is_set"}]}"#)
                .unwrap();
        assert_eq!(list, wrapped);
        assert!(list.is_set());
    }
}
