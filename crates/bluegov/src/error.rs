//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use bluegov_config::ConfigError;
use bluegov_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Radio ────────────────────────────────────────────────────────
    #[error("No radio fixture configured")]
    #[diagnostic(
        code(bluegov::no_fixture),
        help(
            "Pass --fixture <file> or set defaults.fixture in {config_path}.\n\
             Try: bluegov --fixture fixtures/radio.toml adapters"
        )
    )]
    NoFixture { config_path: String },

    #[error("Could not load radio fixture {path}")]
    #[diagnostic(code(bluegov::fixture), help("{reason}"))]
    Fixture { path: String, reason: String },

    #[error("Transport error on {url}: {message}")]
    #[diagnostic(code(bluegov::transport))]
    Transport { url: String, message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(bluegov::not_found),
        help("Run: bluegov {list_command} to see what is in range")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{what} is not reachable")]
    #[diagnostic(
        code(bluegov::unavailable),
        help("The owning device is not connected. It may be out of range or refusing connections.")
    )]
    Unavailable { what: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid bluetooth URL '{input}'")]
    #[diagnostic(
        code(bluegov::invalid_url),
        help("{reason}\nExpected /ADAPTER[/DEVICE[/CHARACTERISTIC]], e.g. /11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19")
    )]
    InvalidUrl { input: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(bluegov::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(bluegov::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(bluegov::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(bluegov::timeout),
        help("Increase the limit with --timeout or check that the device is in range.")
    )]
    Timeout { seconds: u64 },

    // ── Internal / IO / Serialization ────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(bluegov::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    #[diagnostic(code(bluegov::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transport { .. } | Self::Unavailable { .. } => exit_code::CONNECTION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::InvalidUrl { .. }
            | Self::Validation { .. }
            | Self::NoFixture { .. }
            | Self::Fixture { .. }
            | Self::Config { .. } => exit_code::USAGE,
            Self::Internal(_) | Self::Io(_) | Self::Toml(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidUrl { input, reason } => CliError::InvalidUrl { input, reason },

            CoreError::UnexpectedUrlKind { url, expected } => CliError::InvalidUrl {
                input: url,
                reason: format!("expected a {expected} URL"),
            },

            CoreError::NotConnected { url } | CoreError::GovernorDisposed { url } => {
                CliError::Unavailable { what: url }
            }

            CoreError::Transport { url, source } => CliError::Transport {
                url,
                message: source.to_string(),
            },

            CoreError::Config { message } => CliError::Config { message },

            CoreError::ManagerDisposed | CoreError::Internal(_) => {
                CliError::Internal(err.to_string())
            }
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
