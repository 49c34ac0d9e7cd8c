// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Visor node core.
//!
//! One [`NodeVisor`](application::NodeVisor) runs per cluster node. It keeps
//! the membership registry and per-session agent portfolios, turns spawn asks
//! into per-node directives, and routes messages between agents wherever they
//! are hosted.
//!
//! # Architecture
//!
//! - **domain:** value types, pure planning, ports
//! - **application:** node services and background workers
//! - **infrastructure:** transport, process, package and persistence adapters
//! - **presentation:** the node's HTTP surface

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
