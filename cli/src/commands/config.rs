// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use visor_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./visor-config.yaml)
        #[arg(short, long, default_value = "./visor-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let (config, source) =
        NodeConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. VISOR_CONFIG_PATH: {}",
            std::env::var("VISOR_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./visor-config.yaml");
        println!("  4. ~/.visor/config.yaml");
        println!("  5. /etc/visor/config.yaml");
        println!();
    }

    match &source {
        Some(path) => println!("{} {}", "Loaded from:".bold(), path.display()),
        None => println!("{} {}", "Loaded from:".bold(), "(defaults)".dimmed()),
    }
    println!();

    let node = config.self_node()?;
    println!("{}", "Node Identity:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Address: {}", node.address);
    println!("  Machine: {}", node.machine_name);
    println!("  Processors: {}", node.processor_count);
    println!();

    println!("{}", "Cluster:".bold());
    if config.spec.cluster.seeds.is_empty() {
        println!("  Seeds: {}", "(none)".dimmed());
    } else {
        println!("  Seeds:");
        for seed in &config.spec.cluster.seeds {
            println!("    - {}", seed);
        }
    }
    println!("  Registry: {}", config.registry_path(source.as_deref()).display());
    println!("  Notify timeout: {}s", config.spec.cluster.notify_timeout_secs);
    println!();

    println!("{}", "Storage:".bold());
    println!("  Apps: {}", config.spec.storage.apps_dir);
    println!("  Packages: {}", config.spec.storage.packages_dir);
    println!();

    println!("{}", "Network:".bold());
    println!(
        "  Listen: {}:{}",
        config.spec.network.bind_address, config.spec.network.port
    );
    let logging = config.logging();
    println!("  Logging: {} ({})", logging.level, logging.format);
    match config.metrics_port() {
        Some(port) => println!("  Metrics: :{}", port),
        None => println!("  Metrics: {}", "(disabled)".dimmed()),
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let (config, _) = NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    NodeConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
