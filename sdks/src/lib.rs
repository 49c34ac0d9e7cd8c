// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Visor Rust SDK
//!
//! Write one async function; run it as the master of a session and as every
//! worker the master spawns across the cluster.
//!
//! | Module | Role |
//! |--------|------|
//! | [`runtime`] | Process entry point against a node daemon |
//! | [`local`] | Single-process mode with an in-process node |
//! | [`agent`] | Agent handle and lifecycle |
//! | [`mailbox`] | Blocking, predicate-based message retrieval |
//! | [`factory`] | Worker spawning (master only) |
//! | [`host`] | Node-to-agent endpoint and in-process agents |
//! | [`client`] | Agent-to-node calls |
//! | [`log_buffer`] | Captured log lines for the node |

pub mod agent;
pub mod bootstrap;
pub mod client;
pub mod error;
pub mod factory;
pub mod host;
pub mod local;
pub mod log_buffer;
pub mod mailbox;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentState};
pub use bootstrap::AgentBootstrap;
pub use client::{InProcessNode, NodeClient, NodeConnection};
pub use error::SdkError;
pub use factory::WorkerFactory;
pub use host::{entry, AgentEntry, AgentHost};
pub use local::LocalCluster;
pub use log_buffer::{init_agent_logging, LogBuffer};
pub use mailbox::AgentMailbox;
pub use runtime::AgentRuntime;

pub use visor_core::domain::message::{system_types, Message};
pub use visor_core::domain::session::{AgentId, SessionId, SessionInfo};
