//! Layered settings.
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. TOML file: `$KEEL_CONFIG`, else `./keel.toml` when present
//! 3. Environment variables: `KEEL__SECTION__KEY` (e.g. `KEEL__SERVER__BIND`)

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_accounting::AccountCodes;
pub use keel_observability::LogFormat;
use keel_payroll::PayrollPolicy;

pub const CONFIG_PATH_ENV: &str = "KEEL_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";
const ENV_PREFIX: &str = "KEEL";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret for bearer tokens.
    pub jwt_secret: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Runs billed per schedule in one pass.
    pub max_catch_up: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            max_catch_up: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub log: LogSettings,
    pub payroll: PayrollPolicy,
    pub scheduler: SchedulerSettings,
    pub accounts: AccountCodes,
    pub database: DatabaseSettings,
}

impl Settings {
    /// Defaults, then the config file, then `KEEL__*` variables.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let explicit = std::env::var_os(CONFIG_PATH_ENV).is_some();

        let builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path.as_path()).format(FileFormat::Toml).required(explicit))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with a single file, no environment.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with inline TOML.
    pub fn from_toml_str(toml: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(SettingsError::Invalid {
                key: "auth.jwt_secret",
                message: "must not be empty".into(),
            });
        }
        if self.scheduler.interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "scheduler.interval_secs",
                message: "must be positive".into(),
            });
        }
        if self.scheduler.max_catch_up == 0 {
            return Err(SettingsError::Invalid {
                key: "scheduler.max_catch_up",
                message: "must be positive".into(),
            });
        }
        self.payroll.validate().map_err(|e| SettingsError::Invalid {
            key: "payroll",
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.scheduler.max_catch_up, 12);
        assert_eq!(settings.accounts.receivables, "1100");
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let settings = Settings::from_toml_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [log]
            format = "json"

            [payroll]
            income_tax_rate_bp = 1500

            [accounts]
            revenue = "4100"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.bind, "127.0.0.1:9000");
        assert_eq!(settings.log.format, LogFormat::Json);
        assert_eq!(settings.log.filter, "info");
        assert_eq!(settings.payroll.income_tax_rate_bp, 1500);
        assert_eq!(settings.payroll.social_insurance_rate_bp, 700);
        assert_eq!(settings.accounts.revenue, "4100");
        assert_eq!(settings.accounts.cash, "1000");
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Settings::from_toml_str("[scheduler]\ninterval_secs = 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "scheduler.interval_secs", .. }));
    }
}
