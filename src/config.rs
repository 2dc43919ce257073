//! Configuration. Read from yaml, with a handful of environment overrides for
//! the values that tend to differ between deployments.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.

use crate::{
    error::{Error, Result},
    keystore::Domain,
    util::ser,
};
use chrono::Duration;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Overrides `keys.dir`
pub const ENV_KEYS_DIR: &str = "HASHPOST_KEYS_DIR";
/// Overrides `keys.key_version`
pub const ENV_KEY_VERSION: &str = "HASHPOST_KEY_VERSION";
/// Overrides `keys.salt`
pub const ENV_FINGERPRINT_SALT: &str = "HASHPOST_FINGERPRINT_SALT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub enabled: bool,
    pub interval_days: i64,
    pub grace_period_days: i64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_days: 365,
            grace_period_days: 30,
        }
    }
}

/// Longest configurable duration, in days (a century).
pub const MAX_DAYS: i64 = 36_500;

/// Day counts past what chrono can hold saturate; `Config::validate` rejects
/// anything over [`MAX_DAYS`] long before that.
fn days(count: i64) -> Duration {
    Duration::try_days(count).unwrap_or(if count < 0 { Duration::min_value() } else { Duration::max_value() })
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        days(self.interval_days)
    }

    pub fn grace_period(&self) -> Duration {
        days(self.grace_period_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Where the key set lives. Without one, fresh masters are generated in
    /// memory and lost on exit.
    pub dir: Option<PathBuf>,
    pub key_version: u32,
    /// Fingerprint salt
    pub salt: String,
    pub rotation: RotationConfig,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: None,
            key_version: 1,
            salt: String::from("fingerprint_salt_v1"),
            rotation: RotationConfig::default(),
        }
    }
}

/// A role key every new mapping gets sealed under at signup. One envelope is
/// written per grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupGrant {
    pub role: String,
    pub scope: String,
    pub valid_for_days: i64,
}

impl SignupGrant {
    fn new(role: &str, scope: &str, valid_for_days: i64) -> Self {
        Self {
            role: role.to_string(),
            scope: scope.to_string(),
            valid_for_days,
        }
    }

    pub fn valid_for(&self) -> Duration {
        days(self.valid_for_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How far back subforum activity is counted for fingerprint correlation
    pub moderator_window_days: i64,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
    pub fingerprint_roles: Vec<String>,
    pub identity_roles: Vec<String>,
    pub signup_grants: Vec<SignupGrant>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        let strings = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            moderator_window_days: 30,
            default_page_limit: 25,
            max_page_limit: 100,
            fingerprint_roles: strings(&["moderator", "subforum_owner", "site_admin", "platform_admin", "trust_safety", "legal_team"]),
            identity_roles: strings(&["site_admin", "legal_team"]),
            signup_grants: vec![
                SignupGrant::new("moderator", "subforum_correlation", 365),
                SignupGrant::new("site_admin", "full_correlation", 365),
                SignupGrant::new("legal_team", "legal_correlation", 365),
            ],
        }
    }
}

impl CorrelationConfig {
    pub fn moderator_window(&self) -> Duration {
        days(self.moderator_window_days)
    }
}

/// The top-level config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keys: KeysConfig,
    pub correlation: CorrelationConfig,
    /// Role -> domain overrides, layered over the built-in table.
    pub roles: BTreeMap<String, Domain>,
}

impl Config {
    /// Load and validate a yaml config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate yaml.
    pub fn from_yaml(contents: &[u8]) -> Result<Self> {
        let config: Self = ser::from_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        ser::to_yaml(self)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_KEYS_DIR) {
            self.keys.dir = Some(PathBuf::from(dir));
        }
        if let Some(version) = lookup(ENV_KEY_VERSION) {
            self.keys.key_version = version
                .trim()
                .parse()
                .map_err(|_| Error::Validation(format!("{} must be a positive integer", ENV_KEY_VERSION)))?;
        }
        if let Some(salt) = lookup(ENV_FINGERPRINT_SALT) {
            self.keys.salt = salt;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the config for values that can't work.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Validation(String::from(msg)));
        if self.keys.key_version == 0 {
            return invalid("keys.key_version must be at least 1");
        }
        if self.keys.salt.is_empty() {
            return invalid("keys.salt must not be empty");
        }
        if self.keys.rotation.interval_days <= 0 || self.keys.rotation.grace_period_days < 0 {
            return invalid("keys.rotation needs a positive interval and a non-negative grace period");
        }
        if self.keys.rotation.interval_days > MAX_DAYS || self.keys.rotation.grace_period_days > MAX_DAYS {
            return invalid("keys.rotation interval and grace period are capped at 36500 days");
        }
        let corr = &self.correlation;
        if corr.moderator_window_days <= 0 {
            return invalid("correlation.moderator_window_days must be positive");
        }
        if corr.moderator_window_days > MAX_DAYS {
            return invalid("correlation.moderator_window_days is capped at 36500 days");
        }
        if corr.default_page_limit == 0 || corr.max_page_limit == 0 || corr.default_page_limit > corr.max_page_limit {
            return invalid("correlation page limits must be positive, with the default no larger than the max");
        }
        if corr.signup_grants.is_empty() {
            return invalid("correlation.signup_grants must not be empty");
        }
        for grant in &corr.signup_grants {
            if grant.role.is_empty() || grant.scope.is_empty() || grant.role.contains(':') || grant.scope.contains(':') {
                return invalid("signup grant roles and scopes must be non-empty and free of ':'");
            }
            if grant.valid_for_days <= 0 || grant.valid_for_days > MAX_DAYS {
                return invalid("signup grants must be valid for between a day and 36500 days");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.keys.key_version, 1);
        assert_eq!(config.keys.salt, "fingerprint_salt_v1");
        assert!(!config.keys.rotation.enabled);
        assert_eq!(config.keys.rotation.grace_period(), Duration::days(30));
        assert_eq!(config.correlation.moderator_window(), Duration::days(30));
        assert_eq!(config.correlation.max_page_limit, 100);
        assert_eq!(config.correlation.identity_roles, vec![String::from("site_admin"), String::from("legal_team")]);
        assert_eq!(config.correlation.signup_grants.len(), 3);
        // an empty document is the default config
        assert_eq!(Config::from_yaml(b"{}").unwrap(), config);
    }

    #[test]
    fn parse_yaml() {
        let yaml = br#"
keys:
  dir: /var/lib/hashpost/keys
  key_version: 3
  rotation:
    enabled: true
    grace_period_days: 7
correlation:
  moderator_window_days: 14
  signup_grants:
    - { role: moderator, scope: subforum_correlation, valid_for_days: 90 }
roles:
  janitor: moderator_correlation_v1
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.keys.dir, Some(PathBuf::from("/var/lib/hashpost/keys")));
        assert_eq!(config.keys.key_version, 3);
        assert_eq!(config.keys.salt, "fingerprint_salt_v1");
        assert!(config.keys.rotation.enabled);
        assert_eq!(config.keys.rotation.interval_days, 365);
        assert_eq!(config.keys.rotation.grace_period_days, 7);
        assert_eq!(config.correlation.moderator_window_days, 14);
        assert_eq!(config.correlation.default_page_limit, 25);
        assert_eq!(config.correlation.signup_grants, vec![SignupGrant::new("moderator", "subforum_correlation", 90)]);
        assert_eq!(config.roles.get("janitor"), Some(&Domain::ModeratorCorrelation));

        let back = Config::from_yaml(config.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn parse_yaml_invalid() {
        assert!(matches!(Config::from_yaml(b"keys: { key_version: 0 }"), Err(Error::Validation(_))));
        assert!(matches!(Config::from_yaml(b"correlation: { default_page_limit: 500 }"), Err(Error::Validation(_))));
        assert!(matches!(Config::from_yaml(b"correlation: { signup_grants: [] }"), Err(Error::Validation(_))));
        assert!(matches!(Config::from_yaml(b"roles: { janitor: mop_bucket_v1 }"), Err(Error::SerializeYaml(_))));
        let bad_grant = b"correlation: { signup_grants: [ { role: 'mod:x', scope: s, valid_for_days: 1 } ] }";
        assert!(matches!(Config::from_yaml(bad_grant), Err(Error::Validation(_))));
    }

    #[test]
    fn durations_are_capped() {
        let docs: [&[u8]; 5] = [
            b"correlation: { moderator_window_days: 1000000000 }",
            b"correlation: { signup_grants: [ { role: moderator, scope: s, valid_for_days: 36501 } ] }",
            b"keys: { rotation: { interval_days: 9223372036854775807 } }",
            b"keys: { rotation: { grace_period_days: 36501 } }",
            b"correlation: { moderator_window_days: 9223372036854775807 }",
        ];
        for doc in docs {
            assert!(matches!(Config::from_yaml(doc), Err(Error::Validation(_))));
        }
        let edge = Config::from_yaml(b"correlation: { moderator_window_days: 36500 }").unwrap();
        assert_eq!(edge.correlation.moderator_window(), Duration::days(MAX_DAYS));

        // out-of-range counts saturate instead of panicking
        let mut huge = CorrelationConfig::default();
        huge.moderator_window_days = i64::MAX;
        assert_eq!(huge.moderator_window(), Duration::max_value());
    }

    #[test]
    fn env_overrides() {
        let env = |name: &str| match name {
            ENV_KEYS_DIR => Some(String::from("/tmp/keys")),
            ENV_KEY_VERSION => Some(String::from(" 4 ")),
            ENV_FINGERPRINT_SALT => Some(String::from("pepper")),
            _ => None,
        };
        let config = Config::default().apply_env_from(env).unwrap();
        assert_eq!(config.keys.dir, Some(PathBuf::from("/tmp/keys")));
        assert_eq!(config.keys.key_version, 4);
        assert_eq!(config.keys.salt, "pepper");

        let res = Config::default().apply_env_from(|name| if name == ENV_KEY_VERSION { Some(String::from("four")) } else { None });
        assert!(matches!(res, Err(Error::Validation(_))));
        let res = Config::default().apply_env_from(|name| if name == ENV_FINGERPRINT_SALT { Some(String::new()) } else { None });
        assert!(matches!(res, Err(Error::Validation(_))));
    }
}
