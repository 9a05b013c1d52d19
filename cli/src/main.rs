// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Vigil CLI
//!
//! The `vigil` binary hosts the pipeline and talks to a running host.
//!
//! - `vigil serve` runs the pipeline stages and the HTTP command surface
//! - `vigil submit|status|strategies|ledger` delegate to a running daemon over HTTP
//! - `vigil config show|validate` work on the local manifest only

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vigil_cli::commands::{self, ConfigCommand, LedgerFormat};
use vigil_cli::daemon;
use vigil_core::domain::Severity;

/// Vigil - perceive, plan and act on operational signals
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "VIGIL_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of a running daemon
    #[arg(long, global = true, env = "VIGIL_SERVER", default_value = "http://127.0.0.1:8700")]
    server: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VIGIL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and the HTTP API in the foreground
    Serve {
        /// Override the configured API port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Submit an operator directive
    Submit {
        directive: String,

        #[arg(long, default_value = "MEDIUM", value_parser = parse_severity)]
        severity: Severity,
    },

    /// Show the status of one strategy
    Status {
        #[arg(value_name = "STRATEGY_ID")]
        id: uuid::Uuid,
    },

    /// List the most recently updated strategies
    Strategies {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Export the cost ledger
    Ledger {
        #[arg(long, value_enum, default_value = "json")]
        format: LedgerFormat,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn parse_severity(raw: &str) -> Result<Severity, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Serve { port } => daemon::server::serve(cli.config, port).await,
        Commands::Submit { directive, severity } => commands::strategy::submit(&cli.server, &directive, severity).await,
        Commands::Status { id } => commands::strategy::status(&cli.server, id).await,
        Commands::Strategies { limit } => commands::strategy::list(&cli.server, limit).await,
        Commands::Ledger { format } => commands::strategy::ledger(&cli.server, format).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
