// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Visor Node CLI
//!
//! The `visor` binary runs a cluster node and talks to running ones.
//!
//! ## Architecture
//!
//! - **Daemon mode**: `visor --daemon` runs the node in the foreground of a
//!   detached process (started by `visor daemon start`)
//! - **CLI mode**: every other command is an HTTP client of a node
//! - **Detection**: PID file + HTTP health check
//!
//! ## Commands
//!
//! - `visor daemon start|stop|status` - Manage the local node
//! - `visor cluster nodes|info` - Inspect membership and sessions
//! - `visor session agents|kill` - Inspect or end one session
//! - `visor config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use visor_orchestrator::commands::{self, ClusterCommand, ConfigCommand, DaemonCommand, SessionCommand};
use visor_orchestrator::{daemon, logging};

/// Visor node - spawn and connect agents across a cluster
#[derive(Parser)]
#[command(name = "visor")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the node daemon in this process
    #[arg(long, global = true)]
    daemon: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "VISOR_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port of the node (default: 8700, or the configured port in daemon mode)
    #[arg(long, global = true, env = "VISOR_PORT")]
    port: Option<u16>,

    /// HTTP API host of the node
    #[arg(long, global = true, env = "VISOR_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VISOR_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage daemon lifecycle
    #[command(name = "daemon")]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Cluster membership and sessions
    #[command(name = "cluster")]
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },

    /// One distributed session
    #[command(name = "session")]
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.daemon {
        return daemon::start_daemon(cli.config, cli.port, cli.log_level).await;
    }
    let port = cli.port.unwrap_or(daemon::DEFAULT_PORT);

    logging::init_cli(cli.log_level.as_deref().unwrap_or("warn"))?;
    info!(host = %cli.host, port, "CLI mode");

    match cli.command {
        Some(Commands::Daemon { command }) => {
            commands::daemon::handle_command(command, cli.config, &cli.host, port).await
        }
        Some(Commands::Cluster { command }) => {
            commands::cluster::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Session { command }) => {
            commands::session::handle_command(command, &cli.host, port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
