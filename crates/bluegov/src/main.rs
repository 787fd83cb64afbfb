mod cli;
mod commands;
mod error;
mod output;

use std::io;
use std::path::Path;

use clap::{CommandFactory, Parser};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use bluegov_config::LoggingSettings;

use crate::cli::{Cli, Command};
use crate::commands::Context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Shell completions need neither config nor radio
    if let Command::Completions(args) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(args.shell, &mut cmd, "bluegov", &mut io::stdout());
        return;
    }

    let config = match bluegov_config::load_config(cli.global.config.as_deref()) {
        Ok(config) => config,
        Err(err) => exit_with(CliError::from(err), None),
    };

    let guard = init_tracing(cli.global.verbose, &config.logging);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli, config).await {
        exit_with(err, guard);
    }
}

async fn run(cli: Cli, config: bluegov_config::Config) -> Result<(), CliError> {
    let ctx = Context::resolve(&cli.global, config)?;
    tracing::debug!(command = ?cli.command, fixture = ?ctx.fixture, "dispatching command");
    commands::dispatch(cli.command, &ctx).await
}

fn exit_with(err: CliError, guard: Option<WorkerGuard>) -> ! {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    // Flush buffered file logs; process::exit skips destructors.
    drop(guard);
    std::process::exit(code);
}

/// Stderr logging, plus a daily-rotated file when `logging.file` is set.
///
/// Filter precedence: `RUST_LOG`, then `-v` flags, then `logging.level`.
fn init_tracing(verbosity: u8, logging: &LoggingSettings) -> Option<WorkerGuard> {
    let directive = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr = if logging.json {
        fmt::layer().json().with_writer(io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(io::stderr).boxed()
    };

    let (file, guard) = match logging.file.as_deref().map(file_writer) {
        Some((writer, guard)) => {
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(filter)
        .init();
    guard
}

fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map_or_else(|| "bluegov.log".into(), |n| n.to_string_lossy().into_owned());
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix))
}
