//! Throttle rule configuration.
//!
//! Rules are loaded from YAML, either wrapped in a `throttles` key or as a
//! bare map of rule name to rule. A rule set to `null` is registered but
//! inert, which lets a deployment switch a throttle off without touching
//! the code that logs and checks it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::rule::{CorrelationMethod, ThrottleRule};
use crate::error::{Result, ThrottleError};

/// Rules shipped with the service, used when no rules file is configured.
const DEFAULT_RULES: &str = include_str!("../../config/throttles.yaml");

/// A complete set of named throttle rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRulesConfig {
    /// Map of rule name to rule; `None` marks an inert rule
    #[serde(default)]
    pub throttles: BTreeMap<String, Option<ThrottleRule>>,
}

impl ThrottleRulesConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rule set.
    pub fn defaults() -> Result<Self> {
        Self::from_yaml(DEFAULT_RULES)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    ///
    /// A top-level `throttles` key selects the wrapped form, where an empty
    /// or null value means no rules. Any other document is read as a bare
    /// map of rule name to rule.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(parse_error)?;

        let throttles = match document.get("throttles").cloned() {
            Some(serde_yaml::Value::Null) => BTreeMap::new(),
            Some(wrapped) => serde_yaml::from_value(wrapped).map_err(parse_error)?,
            None if document.is_null() => BTreeMap::new(),
            None => serde_yaml::from_value(document).map_err(parse_error)?,
        };

        let config = Self { throttles };
        config.validate()?;
        Ok(config)
    }

    /// Check every active rule for values that cannot be applied.
    pub fn validate(&self) -> Result<()> {
        for (name, rule) in &self.throttles {
            let Some(rule) = rule else { continue };

            if rule.interval_secs() == 0 {
                return Err(ThrottleError::Config(format!(
                    "throttle rule '{}' must have an interval greater than zero",
                    name
                )));
            }

            if let CorrelationMethod::Field(field) = rule.method() {
                if field.is_empty() {
                    return Err(ThrottleError::Config(format!(
                        "throttle rule '{}' has an invalid method '{}'",
                        name, field
                    )));
                }
            }

            if rule.delays().iter().any(|(threshold, _)| *threshold == 0) {
                return Err(ThrottleError::Config(format!(
                    "throttle rule '{}' has a delay threshold of zero",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get the rule registered under `name`, if it is both present and active.
    pub fn get(&self, name: &str) -> Option<&ThrottleRule> {
        self.throttles.get(name).and_then(Option::as_ref)
    }
}

fn parse_error(e: serde_yaml::Error) -> ThrottleError {
    ThrottleError::Config(format!("Failed to parse throttle rules: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_config() {
        let yaml = r#"
throttles:
  sign_in_attempt:
    method: ip
    interval: 3600
    delays:
      4: 5
      5: 10
  password_reset_request: ~
"#;
        let config = ThrottleRulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.throttles.len(), 2);
        assert!(config.throttles.contains_key("password_reset_request"));
        assert!(config.throttles["password_reset_request"].is_none());

        let rule = config.get("sign_in_attempt").unwrap();
        assert_eq!(rule.method(), &CorrelationMethod::Ip);
        assert_eq!(rule.delays(), &[(5, 10), (4, 5)]);
    }

    #[test]
    fn test_parse_bare_map() {
        let yaml = r#"
check_username_request:
  method: ip
  interval: 3600
  delays:
    40: 1000
verification_request: null
"#;
        let config = ThrottleRulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.throttles.len(), 2);
        assert_eq!(config.get("check_username_request").unwrap().interval_secs(), 3600);
        assert!(config.get("verification_request").is_none());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let yaml = r#"
login:
  method: ip
  interval: 0
  delays:
    1: 5
"#;
        let err = ThrottleRulesConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let yaml = r#"
login:
  method: user_identifier
  interval: 60
  delays:
    0: 5
"#;
        assert!(ThrottleRulesConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_throttles_key() {
        for yaml in ["throttles:\n", "throttles: ~\n", "throttles: {}\n"] {
            let config = ThrottleRulesConfig::from_yaml(yaml).unwrap();
            assert!(config.throttles.is_empty(), "{:?} should load no rules", yaml);
        }
    }

    #[test]
    fn test_malformed_wrapped_rules_rejected() {
        let yaml = r#"
throttles:
  login:
    method: ip
    interval: not_a_number
"#;
        let err = ThrottleRulesConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ThrottleError::Config(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ThrottleRulesConfig::from_yaml("- just\n- a list\n").is_err());
    }

    #[test]
    fn test_defaults_parse() {
        let config = ThrottleRulesConfig::defaults().unwrap();
        for name in [
            "check_username_request",
            "password_reset_request",
            "registration_attempt",
            "sign_in_attempt",
            "verification_request",
        ] {
            assert!(config.throttles.contains_key(name), "missing default rule {}", name);
        }

        let sign_in = config.get("sign_in_attempt").unwrap();
        assert_eq!(sign_in.method(), &CorrelationMethod::Ip);
        assert_eq!(sign_in.get_delay(chrono::Utc::now(), 4), 5);
    }
}
