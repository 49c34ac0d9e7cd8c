// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer
//!
//! HTTP surface of a node. Handlers only translate requests into
//! [`NodeVisor`](crate::application::NodeVisor) calls.
//!
//! | Prefix | Caller |
//! |--------|--------|
//! | `/cluster` | other nodes, management tooling |
//! | `/local` | agents hosted on this node |
//! | `/health` | daemon supervision |

pub mod api;

pub use api::{app, AppState};
