//! Command dispatch: bridges CLI args -> manager operations -> output formatting.

pub mod adapters;
pub mod config_cmd;
pub mod devices;
pub mod read;
pub mod scan;
pub mod util;

use std::path::PathBuf;

use clap::ValueEnum;

use bluegov_config::Config;

use crate::cli::{ColorMode, Command, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Flags resolved against the config file, shared by every handler.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub config_path: PathBuf,
    pub fixture: Option<PathBuf>,
    pub output: OutputFormat,
    pub color: bool,
    pub quiet: bool,
}

impl Context {
    /// Flag > env > config file > built-in default.
    pub fn resolve(global: &GlobalOpts, config: Config) -> Result<Self, CliError> {
        let output = match global.output {
            Some(format) => format,
            None => parse_setting("defaults.output", &config.defaults.output)?,
        };
        let color = match global.color {
            Some(mode) => mode,
            None => parse_setting::<ColorMode>("defaults.color", &config.defaults.color)?,
        };

        Ok(Self {
            config_path: global
                .config
                .clone()
                .unwrap_or_else(bluegov_config::config_path),
            fixture: global
                .fixture
                .clone()
                .or_else(|| config.defaults.fixture.clone()),
            output,
            color: output::should_color(color),
            quiet: global.quiet,
            config,
        })
    }
}

fn parse_setting<T: ValueEnum>(field: &str, raw: &str) -> Result<T, CliError> {
    T::from_str(raw, true).map_err(|reason| CliError::Validation {
        field: field.into(),
        reason,
    })
}

/// Dispatch a radio-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context) -> Result<(), CliError> {
    match cmd {
        Command::Scan(args) => scan::handle(args, ctx).await,
        Command::Adapters => adapters::handle(ctx).await,
        Command::Devices(args) => devices::handle(args, ctx).await,
        Command::Read(args) => read::handle(args, ctx).await,
        Command::Config(args) => config_cmd::handle(args, ctx),
        Command::Completions(_) => Err(CliError::Internal(
            "completions are generated before dispatch".into(),
        )),
    }
}
