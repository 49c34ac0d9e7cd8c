// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model of a cluster node: sessions, agents, messages, membership,
//! spawn planning, and the ports the application layer talks through.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

pub mod cluster;
pub mod message;
pub mod node_config;
pub mod portfolio;
pub mod repository;
pub mod runtime;
pub mod session;
pub mod spawn;
pub mod transport;
