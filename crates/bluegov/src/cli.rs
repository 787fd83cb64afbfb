//! Clap derive structures for the `bluegov` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// bluegov -- discover and govern Bluetooth Low Energy devices
#[derive(Debug, Parser)]
#[command(
    name = "bluegov",
    version,
    about = "Discover and govern Bluetooth Low Energy adapters and devices",
    long_about = "Runs the bluegov discovery engine against a Bluetooth Low Energy radio stack.\n\n\
        Without hardware access the radio is simulated from a TOML fixture\n\
        (--fixture or defaults.fixture in the config file).",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "BLUEGOV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Radio fixture describing the simulated adapters and devices
    #[arg(long, short = 'f', env = "BLUEGOV_FIXTURE", global = true)]
    pub fixture: Option<PathBuf>,

    /// Output format [default: table, or defaults.output]
    #[arg(long, short = 'o', env = "BLUEGOV_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output [default: auto, or defaults.color]
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run discovery and stream discovered/lost events
    #[command(alias = "s")]
    Scan(ScanArgs),

    /// List adapters present on the radio
    #[command(alias = "a")]
    Adapters,

    /// Run discovery and list devices in range
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Connect to a device and read one characteristic
    Read(ReadArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

/// Combination switches shared by the discovery commands.
#[derive(Debug, Args)]
pub struct CombineArgs {
    /// Report same-address devices seen through several adapters once
    #[arg(long)]
    pub combined_devices: bool,

    /// Present all adapters as one combined adapter
    #[arg(long)]
    pub combined_adapters: bool,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to scan, in seconds
    #[arg(long, short = 'd', default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: u64,

    /// Discovery period in seconds (overrides manager.discovery_rate)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate: Option<u64>,

    /// Re-announce devices that are still present on every cycle
    #[arg(long)]
    pub rediscover: bool,

    #[command(flatten)]
    pub combine: CombineArgs,
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(flatten)]
    pub combine: CombineArgs,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Characteristic URL, e.g. /11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19
    pub url: String,

    /// Give up if the characteristic is not reachable within this many seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved configuration
    Show,

    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
