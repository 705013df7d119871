// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # leasehold Server Host CLI
//!
//! The `leasehold` binary hosts the NFSv4 client state core: it loads the
//! server configuration, starts logging and the Prometheus exporter, and
//! runs the lease reaper until it receives a shutdown signal.
//!
//! ## Commands
//!
//! - `leasehold serve` - Run the state core in the foreground
//! - `leasehold config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use leasehold_core::domain::server_config::{LoggingConfig, ServerConfigManifest};

mod commands;

use commands::ConfigCommand;

/// leasehold - NFSv4 client identity, lease and state server
#[derive(Parser)]
#[command(name = "leasehold")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "LEASEHOLD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LEASEHOLD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "LEASEHOLD_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the state core until interrupted
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // the command reports load errors itself; here they only mean "no manifest logging"
    let manifest_logging = ServerConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|config| config.spec.observability)
        .and_then(|observability| observability.logging);
    let (level, format) = resolve_logging(&cli, &matches, manifest_logging);
    init_logging(&level, format)?;

    match cli.command {
        Some(Commands::Serve) => commands::serve::run(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Pick the log level and format. Flags and environment variables win; the
/// manifest's `observability.logging` fills in whatever was left at its default.
fn resolve_logging(
    cli: &Cli,
    matches: &ArgMatches,
    manifest: Option<LoggingConfig>,
) -> (String, LogFormat) {
    let defaulted = |id: &str| matches.value_source(id) == Some(ValueSource::DefaultValue);
    let mut level = cli.log_level.clone();
    let mut format = cli.log_format;

    if let Some(logging) = manifest {
        if defaulted("log_level") {
            level = logging.level;
        }
        if defaulted("log_format") {
            if let Ok(parsed) = <LogFormat as ValueEnum>::from_str(&logging.format, true) {
                format = parsed;
            }
        }
    }

    (level, format)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.compact().init(),
    }

    Ok(())
}
