use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::PolicyError;
use crate::rules::{RiskRule, RuleSet};
use crate::types::{MAX_RISK_LEVEL, MIN_RISK_LEVEL};

pub const DEFAULT_RISK_THRESHOLD: u8 = 3;

pub const ENV_RISK_THRESHOLD: &str = "AGENT_POLICY_RISK_THRESHOLD";
pub const ENV_AUDIT_LEVEL: &str = "AGENT_POLICY_AUDIT_LEVEL";
pub const ENV_AUDIT_CAPACITY: &str = "AGENT_POLICY_AUDIT_CAPACITY";
pub const ENV_RULES_FILE: &str = "AGENT_POLICY_RULES_FILE";

/// How much of the submitted command an audit entry keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Only a SHA-256 digest of the command is retained.
    Minimal,
    #[default]
    Full,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Minimal => "minimal",
            AuditLevel::Full => "full",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLevel {
    type Err = PolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(AuditLevel::Minimal),
            "full" => Ok(AuditLevel::Full),
            other => Err(PolicyError::InvalidConfig(format!(
                "unknown audit level: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub risk_threshold: u8,
    pub audit_level: AuditLevel,
    /// `None` keeps every entry for the lifetime of the engine.
    pub audit_capacity: Option<usize>,
    pub rules: RuleSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            audit_level: AuditLevel::default(),
            audit_capacity: None,
            rules: RuleSet::defaults(),
        }
    }
}

/// On-disk shape of a policy file (TOML, or JSON for `.json` paths).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
struct EngineConfigFile {
    risk_threshold: Option<u8>,
    audit_level: Option<AuditLevel>,
    audit_capacity: Option<usize>,
    include_default_rules: Option<bool>,
    rules: Vec<RiskRule>,
}

impl From<EngineConfigFile> for EngineConfig {
    fn from(file: EngineConfigFile) -> Self {
        let mut rules = if file.include_default_rules.unwrap_or(true) {
            RuleSet::defaults()
        } else {
            RuleSet::default()
        };
        rules.rules.extend(file.rules);

        Self {
            risk_threshold: file.risk_threshold.unwrap_or(DEFAULT_RISK_THRESHOLD),
            audit_level: file.audit_level.unwrap_or_default(),
            audit_capacity: file.audit_capacity,
            rules,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(MIN_RISK_LEVEL..=MAX_RISK_LEVEL).contains(&self.risk_threshold) {
            return Err(PolicyError::InvalidConfig(format!(
                "risk threshold must be between {MIN_RISK_LEVEL} and {MAX_RISK_LEVEL}, got {}",
                self.risk_threshold
            )));
        }
        if self.audit_capacity == Some(0) {
            return Err(PolicyError::InvalidConfig(
                "audit capacity must be greater than zero".to_string(),
            ));
        }
        self.rules.validate()
    }

    pub fn from_toml_str(input: &str) -> Result<Self, PolicyError> {
        let file: EngineConfigFile = toml::from_str(input)?;
        let config = EngineConfig::from(file);
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(input: &str) -> Result<Self, PolicyError> {
        let file: EngineConfigFile = serde_json::from_str(input)?;
        let config = EngineConfig::from(file);
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    pub fn from_env() -> Result<Self, PolicyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `AGENT_POLICY_*` variables resolved through `lookup`.
    /// A rules file provides the base; individual variables override it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PolicyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let mut config = match value(ENV_RULES_FILE) {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };

        if let Some(raw) = value(ENV_RISK_THRESHOLD) {
            config.risk_threshold = raw.parse::<u8>().map_err(|_| {
                PolicyError::InvalidConfig(format!("{ENV_RISK_THRESHOLD} is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = value(ENV_AUDIT_LEVEL) {
            config.audit_level = raw.parse()?;
        }
        if let Some(raw) = value(ENV_AUDIT_CAPACITY) {
            config.audit_capacity = Some(raw.parse::<usize>().map_err(|_| {
                PolicyError::InvalidConfig(format!("{ENV_AUDIT_CAPACITY} is not a number: {raw}"))
            })?);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AnalyzerKind;
    use crate::types::RiskCategory;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.risk_threshold, 3);
        assert_eq!(config.audit_level, AuditLevel::Full);
        assert_eq!(config.audit_capacity, None);
    }

    #[test]
    fn environment_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_RISK_THRESHOLD, " 5 "),
            (ENV_AUDIT_LEVEL, "Minimal"),
            (ENV_AUDIT_CAPACITY, "100"),
        ]))
        .unwrap();
        assert_eq!(config.risk_threshold, 5);
        assert_eq!(config.audit_level, AuditLevel::Minimal);
        assert_eq!(config.audit_capacity, Some(100));
    }

    #[test]
    fn invalid_environment_is_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_RISK_THRESHOLD, "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_RISK_THRESHOLD, "six")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_AUDIT_LEVEL, "verbose")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_AUDIT_CAPACITY, "0")])).is_err());
    }

    #[test]
    fn toml_file_extends_default_rules() {
        let config = EngineConfig::from_toml_str(
            r#"
risk_threshold = 4
audit_level = "minimal"
audit_capacity = 500

[[rules]]
id = "custom.kubectl-delete"
analyzer = "security"
pattern = "kubectl\\s+delete\\s+namespace"
score = 4
category = "security"
class = "cluster teardown"
"#,
        )
        .unwrap();

        assert_eq!(config.risk_threshold, 4);
        assert_eq!(config.audit_level, AuditLevel::Minimal);
        assert_eq!(config.audit_capacity, Some(500));
        assert_eq!(config.rules.len(), RuleSet::defaults().len() + 1);
        let custom = config.rules.rules.last().unwrap();
        assert_eq!(custom.analyzer, AnalyzerKind::Security);
        assert_eq!(custom.category, RiskCategory::Security);
    }

    #[test]
    fn toml_file_can_replace_default_rules() {
        let config = EngineConfig::from_toml_str("include_default_rules = false\n").unwrap();
        assert!(config.rules.is_empty());
        assert!(EngineConfig::from_toml_str("risk_treshold = 2\n").is_err());
    }

    #[test]
    fn rules_file_from_environment() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "risk_threshold": 2, "include_default_rules": false }}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_RULES_FILE, path.as_str()),
            (ENV_AUDIT_LEVEL, "minimal"),
        ]))
        .unwrap();
        assert_eq!(config.risk_threshold, 2);
        assert_eq!(config.audit_level, AuditLevel::Minimal);
        assert!(config.rules.is_empty());

        let missing = EngineConfig::from_lookup(lookup(&[(ENV_RULES_FILE, "/nonexistent/policy.toml")]));
        assert!(matches!(missing, Err(PolicyError::Io { .. })));
    }
}
