// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Infrastructure Layer
//!
//! Adapters behind the domain ports.
//!
//! | Module | Port | Description |
//! |--------|------|-------------|
//! | [`http`] | `ClusterClient`, `AgentClient` | `reqwest` JSON transport plus the agent endpoint directory |
//! | [`loopback`] | `ClusterClient`, `AgentClient`, `AgentLauncher` | In-process cluster for tests and single-process mode |
//! | [`process`] | `AgentLauncher` | OS processes via `tokio::process` |
//! | [`package`] | | Tar deployment packages unpacked per session |
//! | [`repositories`] | `ClusterRegistryStore` | YAML file and in-memory registry persistence |

pub mod http;
pub mod loopback;
pub mod package;
pub mod process;
pub mod repositories;
