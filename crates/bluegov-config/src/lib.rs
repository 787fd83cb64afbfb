//! Shared configuration for bluegov tools.
//!
//! TOML file + `BLUEGOV_` environment layering via figment, and
//! translation to `bluegov_core::ManagerConfig`. The CLI adds its flag
//! overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bluegov_core::ManagerConfig;

/// Prefix for environment overrides. Nested keys use `__`, e.g.
/// `BLUEGOV_MANAGER__DISCOVERY_RATE=2`.
pub const ENV_PREFIX: &str = "BLUEGOV_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Output and input defaults for the CLI.
    #[serde(default)]
    pub defaults: Defaults,

    /// Discovery and refresh tuning.
    #[serde(default)]
    pub manager: ManagerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Radio fixture used when `--fixture` is not given.
    pub fixture: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            fixture: None,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// Manager tuning. Rates are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManagerSettings {
    #[serde(default = "default_discovery_rate")]
    pub discovery_rate: u64,

    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: u64,

    /// Re-announce still-present entities on every cycle.
    #[serde(default)]
    pub rediscover: bool,

    #[serde(default)]
    pub combined_adapters: bool,

    #[serde(default)]
    pub combined_devices: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            discovery_rate: default_discovery_rate(),
            refresh_rate: default_refresh_rate(),
            rediscover: false,
            combined_adapters: false,
            combined_devices: false,
        }
    }
}

fn default_discovery_rate() -> u64 {
    10
}
fn default_refresh_rate() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to this file (daily rotation).
    pub file: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".into()
}

// ── Translation ─────────────────────────────────────────────────────

impl ManagerSettings {
    /// Validate and convert into the core manager configuration.
    pub fn to_manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        Ok(ManagerConfig {
            discovery_rate: rate("manager.discovery_rate", self.discovery_rate)?,
            refresh_rate: rate("manager.refresh_rate", self.refresh_rate)?,
            rediscover: self.rediscover,
            combined_adapters: self.combined_adapters,
            combined_devices: self.combined_devices,
        })
    }
}

fn rate(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "bluegov", "bluegov").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("bluegov");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from defaults, the TOML file at `path` (or the
/// canonical path) and the environment. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default(path: Option<&Path>) -> Config {
    load_config(path).unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path` (or the canonical
/// path), creating parent directories. Returns the written path.
pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();

        assert_eq!(config.manager, ManagerSettings::default());
        assert_eq!(config.defaults.output, "table");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [manager]
                discovery_rate = 2
                combined_devices = true

                [defaults]
                output = "json"
                fixture = "/etc/bluegov/radio.toml"
            "#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.manager.discovery_rate, 2);
        assert_eq!(config.manager.refresh_rate, 5);
        assert!(config.manager.combined_devices);
        assert_eq!(config.defaults.output, "json");
        assert_eq!(
            config.defaults.fixture,
            Some(PathBuf::from("/etc/bluegov/radio.toml"))
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[manager]\ndiscovery_rate = \"soon\"\n").unwrap();

        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.manager.rediscover = true;
        config.logging.json = true;

        let written = save_config(&config, Some(&path)).unwrap();
        assert_eq!(written, path);
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn manager_config_translation_validates_rates() {
        let settings = ManagerSettings {
            discovery_rate: 3,
            combined_adapters: true,
            ..ManagerSettings::default()
        };
        let config = settings.to_manager_config().unwrap();
        assert_eq!(config.discovery_rate, Duration::from_secs(3));
        assert_eq!(config.refresh_rate, Duration::from_secs(5));
        assert!(config.combined_adapters);

        let zero = ManagerSettings {
            refresh_rate: 0,
            ..ManagerSettings::default()
        };
        let err = zero.to_manager_config().unwrap_err();
        assert!(err.to_string().contains("manager.refresh_rate"));
    }
}
