// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Visor CLI

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod session;

pub use self::cluster::ClusterCommand;
pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::session::SessionCommand;
