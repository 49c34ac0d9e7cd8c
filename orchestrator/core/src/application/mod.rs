// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod fanout;
pub mod membership;
pub mod message_router;
pub mod node;
pub mod portfolio_store;
pub mod spawn_scheduler;
pub mod work_queue;

#[cfg(test)]
pub(crate) mod testing;

// Re-export services for convenience
pub use membership::ClusterMembershipRegistry;
pub use message_router::MessageRouter;
pub use node::{ManagementInfo, NodeDependencies, NodeSettings, NodeVisor};
pub use portfolio_store::{Route, SessionPortfolioStore, SessionSummary};
pub use spawn_scheduler::SpawnScheduler;
