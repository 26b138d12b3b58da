//! Engine configuration.
//!
//! # Responsibility
//! - Load settings from defaults, an optional TOML file and `HERA_*`
//!   environment overrides, in that order.
//! - Build the smart code registry and pagination bounds the services use.
//!
//! # Invariants
//! - Invalid environment values are ignored with a warning, never fatal.
//! - A loaded config has passed `validate()`.

use crate::logging::default_log_level;
use crate::service::PageLimits;
use crate::smart_code::registry::{
    RegistryError, SmartCodeBehavior, SmartCodeRegistry, DEFAULT_LEDGER_EPSILON,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DB_PATH: &str = "HERA_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "HERA_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "HERA_LOG_DIR";
pub const ENV_LEDGER_EPSILON: &str = "HERA_LEDGER_EPSILON";

/// One extra `segments -> behavior` classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartCodeRuleConfig {
    /// Dotted segment sequence, e.g. `FIN.AP`.
    pub segments: String,
    /// `ledger_balance` or `active_edge`.
    pub behavior: String,
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// SQLite file; `None` runs against an in-memory database.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` disables file logs.
    pub log_dir: Option<PathBuf>,
    pub ledger_epsilon: f64,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    pub smart_code_rules: Vec<SmartCodeRuleConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = PageLimits::default();
        Self {
            database_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            ledger_epsilon: DEFAULT_LEDGER_EPSILON,
            default_page_limit: limits.default_limit,
            max_page_limit: limits.max_limit,
            smart_code_rules: Vec::new(),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse { path: Option<PathBuf>, message: String },
    Invalid(String),
    Registry(RegistryError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "failed to read {}: {message}", path.display())
            }
            Self::Parse {
                path: Some(path),
                message,
            } => write!(f, "failed to parse {}: {message}", path.display()),
            Self::Parse { path: None, message } => write!(f, "failed to parse config: {message}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
            Self::Registry(err) => write!(f, "invalid smart_code_rules: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for ConfigError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl EngineConfig {
    /// Parses a TOML document on top of the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: None,
            message: err.to_string(),
        })
    }

    /// Loads defaults, then `path` when given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
                        path: path.to_path_buf(),
                        message: err.to_string(),
                    })?;
                toml::from_str(&contents).map_err(|err| ConfigError::Parse {
                    path: Some(path.to_path_buf()),
                    message: err.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `HERA_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = non_blank(lookup(ENV_DB_PATH)) {
            self.database_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = non_blank(lookup(ENV_LOG_LEVEL)) {
            self.log_level = raw;
        }
        if let Some(raw) = non_blank(lookup(ENV_LOG_DIR)) {
            self.log_dir = Some(PathBuf::from(raw));
        }
        if let Some(raw) = non_blank(lookup(ENV_LEDGER_EPSILON)) {
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() && value >= 0.0 => self.ledger_epsilon = value,
                Ok(value) => warn!(
                    "event=config_env module=config status=error var={} reason=out_of_range value={}",
                    ENV_LEDGER_EPSILON, value
                ),
                Err(err) => warn!(
                    "event=config_env module=config status=error var={} reason={}",
                    ENV_LEDGER_EPSILON, err
                ),
            }
        }
    }

    /// Checks numeric bounds and rule syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ledger_epsilon.is_finite() || self.ledger_epsilon < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ledger_epsilon must be a non-negative number, got {}",
                self.ledger_epsilon
            )));
        }
        if self.max_page_limit == 0 {
            return Err(ConfigError::Invalid(
                "max_page_limit must be at least 1".to_string(),
            ));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(ConfigError::Invalid(format!(
                "default_page_limit must be within 1..={}, got {}",
                self.max_page_limit, self.default_page_limit
            )));
        }
        self.build_registry()?;
        Ok(())
    }

    /// Builds the default registry plus configured rules.
    pub fn build_registry(&self) -> Result<SmartCodeRegistry, ConfigError> {
        let mut registry = SmartCodeRegistry::with_defaults(self.ledger_epsilon);
        for rule in &self.smart_code_rules {
            let behavior = SmartCodeBehavior::parse(&rule.behavior).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "unknown smart code behavior `{}` for `{}`",
                    rule.behavior, rule.segments
                ))
            })?;
            registry.register_rule(&rule.segments, behavior)?;
        }
        Ok(registry)
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_page_limit,
            max_limit: self.max_page_limit,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, ENV_DB_PATH, ENV_LEDGER_EPSILON, ENV_LOG_LEVEL};
    use crate::smart_code::code::SmartCode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn toml_overrides_defaults_and_adds_rules() {
        let config = EngineConfig::from_toml_str(
            r#"
            database_path = "/var/lib/hera/hera.db"
            ledger_epsilon = 0.001
            default_page_limit = 20

            [[smart_code_rules]]
            segments = "FIN.AP"
            behavior = "ledger_balance"
            "#,
        )
        .expect("config should parse");

        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/hera/hera.db"))
        );
        assert_eq!(config.default_page_limit, 20);
        assert_eq!(config.max_page_limit, 500);
        config.validate().expect("config should be valid");

        let registry = config.build_registry().expect("registry");
        let code = SmartCode::parse("HERA.FIN.AP.INVOICE.v1").expect("code");
        assert!(registry.is_ledger(&code));
    }

    #[test]
    fn unknown_keys_and_behaviors_are_rejected() {
        let err = EngineConfig::from_toml_str("ledger_tolerance = 1.0").expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse { .. }));

        let config = EngineConfig::from_toml_str(
            r#"
            [[smart_code_rules]]
            segments = "HR"
            behavior = "payroll"
            "#,
        )
        .expect("config should parse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_apply_and_invalid_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_PATH, " /tmp/hera.db "),
            (ENV_LOG_LEVEL, "warn"),
            (ENV_LEDGER_EPSILON, "not-a-number"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_overrides_from(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/hera.db")));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.ledger_epsilon, 0.01);
    }

    #[test]
    fn page_limits_must_be_consistent() {
        let config = EngineConfig {
            default_page_limit: 600,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
