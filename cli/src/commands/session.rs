// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session commands
//!
//! Commands: agents, kill

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use visor_core::domain::session::SessionId;

use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List agents of a session running on this node
    Agents {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// End a session on every node of the cluster
    Kill {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },
}

pub async fn handle_command(command: SessionCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(host, port)?;
    match command {
        SessionCommand::Agents { session_id } => {
            let agents = client.running_agents(session_id).await?;
            if agents.is_empty() {
                println!("{}", format!("No agents of {} on this node", session_id).yellow());
            } else {
                let ids: Vec<String> = agents.iter().map(ToString::to_string).collect();
                println!("{}", ids.join(" "));
            }
        }
        SessionCommand::Kill { session_id } => {
            client.kill_session(session_id).await?;
            println!("{}", format!("✓ Session {} killed", session_id).green());
        }
    }
    Ok(())
}
