//! Config subcommand handlers.

use bluegov_config::{self as config, Config};

use super::Context;
use crate::cli::{ConfigArgs, ConfigCommand, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, ctx: &Context) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let out = match ctx.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&ctx.config)?,
                OutputFormat::Json => output::render_json(&ctx.config, false)?,
                OutputFormat::JsonCompact => output::render_json(&ctx.config, true)?,
                OutputFormat::Yaml => output::render_yaml(&ctx.config)?,
            };
            output::print_output(out.trim_end(), ctx.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = &ctx.config_path;
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            let written = config::save_config(&Config::default(), Some(path))?;
            output::print_output(
                &format!("Wrote default configuration to {}", written.display()),
                ctx.quiet,
            );
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&ctx.config_path.display().to_string(), ctx.quiet);
            Ok(())
        }
    }
}
