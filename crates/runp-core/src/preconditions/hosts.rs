use super::{Precondition, PreconditionVerifyResult, SystemProbe};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Requires the hosts file to map each address to the listed names
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EtcHostsPrecondition {
    pub contains: BTreeMap<String, Vec<String>>,
}

/// Address to names, in file order. Blank lines and lines starting with `#`
/// or `;` are skipped; repeated addresses accumulate their names.
pub fn parse_etc_hosts(content: &str) -> BTreeMap<String, Vec<String>> {
    let mut hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(address) = fields.next() else {
            continue;
        };
        let names: Vec<String> = fields
            .take_while(|field| !field.starts_with('#'))
            .map(str::to_string)
            .collect();
        if !names.is_empty() {
            hosts.entry(address.to_string()).or_default().extend(names);
        }
    }
    hosts
}

impl Precondition for EtcHostsPrecondition {
    fn is_set(&self) -> bool {
        !self.contains.is_empty()
    }

    fn verify(&self, probe: &dyn SystemProbe) -> PreconditionVerifyResult {
        let content = match probe.read_hosts_file() {
            Ok(content) => content,
            Err(e) => return PreconditionVerifyResult::stop([e.to_string()]),
        };
        let hosts = parse_etc_hosts(&content);

        let mut reasons = Vec::new();
        for (address, expected) in &self.contains {
            let Some(mapped) = hosts.get(address) else {
                reasons.push(format!("No mapping found for \"{address}\""));
                continue;
            };
            for name in expected.iter().filter(|name| !mapped.contains(name)) {
                reasons.push(format!(
                    "Hosts mapping \"{address}\" {mapped:?} does not contain \"{name}\""
                ));
            }
        }

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

    const HOSTS: &str = "\
# comment line
127.0.0.1\tlocalhost
; another comment
::1 localhost ip6-localhost
10.0.0.5   db.local   cache.local # trailing
10.0.0.5 queue.local
";

    fn with_hosts(content: &str) -> FakeSystem {
        FakeSystem {
            hosts: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_etc_hosts() {
        let hosts = parse_etc_hosts(HOSTS);
        assert_eq!(hosts["127.0.0.1"], vec!["localhost"]);
        assert_eq!(hosts["::1"], vec!["localhost", "ip6-localhost"]);
        assert_eq!(
            hosts["10.0.0.5"],
            vec!["db.local", "cache.local", "queue.local"]
        );
        assert_eq!(hosts.len(), 3);
    }

    #[test]
    fn test_contains_mapping() {
        let precondition = EtcHostsPrecondition {
            contains: BTreeMap::from([(
                "10.0.0.5".to_string(),
                vec!["db.local".to_string(), "queue.local".to_string()],
            )]),
        };
        assert!(precondition.verify(&with_hosts(HOSTS)).is_proceed());
    }

    #[test]
    fn test_missing_mapping_and_name() {
        let precondition = EtcHostsPrecondition {
            contains: BTreeMap::from([
                ("10.0.0.5".to_string(), vec!["mail.local".to_string()]),
                ("192.168.1.1".to_string(), vec!["router".to_string()]),
            ]),
        };
        let result = precondition.verify(&with_hosts(HOSTS));
        assert_eq!(result.vote, Vote::Stop);
        assert_eq!(result.reasons.len(), 2);
        assert!(result.reasons[0].contains("does not contain \"mail.local\""));
        assert_eq!(result.reasons[1], r#"No mapping found for "192.168.1.1""#);
    }

    #[test]
    fn test_unreadable_hosts_file_stops() {
        let precondition = EtcHostsPrecondition {
            contains: BTreeMap::from([("127.0.0.1".to_string(), vec![])]),
        };
        let result = precondition.verify(&FakeSystem::default());
        assert_eq!(result.vote, Vote::Stop);
    }
}
