// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster inspection commands
//!
//! Commands: nodes, info

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;

use visor_core::application::ManagementInfo;
use visor_core::domain::cluster::ClusterNode;

use crate::commands::daemon::format_duration;
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum ClusterCommand {
    /// List the nodes this node knows about
    Nodes {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show membership and per-session agent counts
    Info {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: ClusterCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(host, port)?;
    match command {
        ClusterCommand::Nodes { json } => {
            let nodes = client.cluster_nodes().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else {
                print!("{}", render_nodes(&nodes));
            }
        }
        ClusterCommand::Info { json } => {
            let info = client.cluster_info().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print!("{}", render_info(&info));
            }
        }
    }
    Ok(())
}

fn state_label(node: &ClusterNode) -> String {
    if node.is_active {
        "active".green().to_string()
    } else {
        "inactive".red().to_string()
    }
}

pub fn render_nodes(nodes: &[ClusterNode]) -> String {
    let mut out = format!(
        "{:<24} {:>6}  {:<20} {}\n",
        "ADDRESS".bold(),
        "CPUS".bold(),
        "MACHINE".bold(),
        "STATE".bold()
    );
    for node in nodes {
        out.push_str(&format!(
            "{:<24} {:>6}  {:<20} {}\n",
            node.address.as_str(),
            node.processor_count,
            node.machine_name,
            state_label(node)
        ));
    }
    out
}

pub fn render_info(info: &ManagementInfo) -> String {
    let uptime = (Utc::now() - info.started_at).num_seconds().max(0) as u64;
    let mut out = format!(
        "{} {} (up {})\n\n",
        "Node:".bold(),
        info.node.address,
        format_duration(uptime)
    );
    out.push_str(&render_nodes(&info.nodes));

    out.push_str(&format!("\n{}\n", "Sessions:".bold()));
    if info.sessions.is_empty() {
        out.push_str(&format!("  {}\n", "(none)".dimmed()));
    }
    for session in &info.sessions {
        let total: usize = session.agents_per_node.values().sum();
        out.push_str(&format!(
            "  {} {} ({} agents, {} here)\n",
            session.session_id, session.process_name, total, session.local_agents
        ));
        for (node, count) in &session.agents_per_node {
            out.push_str(&format!("    {:<24} {}\n", node.as_str(), count));
        }
    }
    out
}
