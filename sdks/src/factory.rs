// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker spawning for the master agent.
//!
//! Every method forwards one ask to the local node; the node plans where the
//! workers run. Capacity strategies carry a count of 1 and put their own
//! number in `factor`.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use visor_core::domain::session::{SessionInfo, BROADCAST_AGENT_ID};
use visor_core::infrastructure::http::wire::SpawnBody;
use visor_core::infrastructure::package;

use crate::client::NodeConnection;
use crate::error::{Result, SdkError};

pub const STRATEGY_PLAIN: i32 = 0;
pub const STRATEGY_ONE_PER_NODE: i32 = 1;
pub const STRATEGY_ONE_PER_PROCESSOR: i32 = 2;
pub const STRATEGY_ONE_LESS_THAN_PROCESSORS: i32 = 3;
pub const STRATEGY_PROCESSORS_MINUS_COUNT: i32 = 4;
pub const STRATEGY_PROCESSORS_TIMES_FACTOR: i32 = 5;
pub const STRATEGY_COUNT_PER_NODE: i32 = 6;

#[derive(Clone)]
pub struct WorkerFactory {
    session: SessionInfo,
    node: Arc<dyn NodeConnection>,
    executable: String,
    package: Option<Vec<u8>>,
}

impl std::fmt::Debug for WorkerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerFactory")
            .field("session_id", &self.session.session_id)
            .field("executable", &self.executable)
            .field("package_bytes", &self.package.as_ref().map(Vec::len))
            .finish()
    }
}

impl WorkerFactory {
    /// Workers run `executable`. Without a package, nodes must already have it
    /// installed under their apps directory.
    pub fn new(session: SessionInfo, node: Arc<dyn NodeConnection>, executable: impl Into<String>) -> Self {
        Self {
            session,
            node,
            executable: executable.into(),
            package: None,
        }
    }

    pub fn with_package(mut self, package: Vec<u8>) -> Self {
        self.package = Some(package);
        self
    }

    /// Ship the contents of `dir` to every node that starts a worker.
    pub fn with_package_dir(self, dir: &Path) -> anyhow::Result<Self> {
        let bytes = package::pack_directory(dir)?;
        Ok(self.with_package(bytes))
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// `count` workers dealt round-robin over the active nodes.
    pub async fn spawn_workers(&self, count: u32, args: Vec<String>) -> Result<bool> {
        self.spawn_internal(count, args, STRATEGY_PLAIN, 0.0).await
    }

    pub async fn spawn_one_per_node(&self, args: Vec<String>) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_ONE_PER_NODE, 0.0).await
    }

    pub async fn spawn_one_per_processor(&self, args: Vec<String>) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_ONE_PER_PROCESSOR, 0.0).await
    }

    pub async fn spawn_one_per_processor_less_one(&self, args: Vec<String>) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_ONE_LESS_THAN_PROCESSORS, 0.0).await
    }

    pub async fn spawn_one_per_processor_less_count(&self, args: Vec<String>, count: u32) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_PROCESSORS_MINUS_COUNT, f64::from(count))
            .await
    }

    /// Processors times `factor` per node.
    pub async fn spawn_as_factor_of_processors(&self, args: Vec<String>, factor: f64) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_PROCESSORS_TIMES_FACTOR, factor).await
    }

    pub async fn spawn_count_per_node(&self, args: Vec<String>, count: u32) -> Result<bool> {
        self.spawn_internal(1, args, STRATEGY_COUNT_PER_NODE, f64::from(count)).await
    }

    async fn spawn_internal(&self, count: u32, args: Vec<String>, strategy: i32, factor: f64) -> Result<bool> {
        let count = match u16::try_from(count) {
            Ok(c) if c != 0 && c != BROADCAST_AGENT_ID => c,
            _ => return Err(SdkError::InvalidCount(count)),
        };
        info!(
            session_id = %self.session.session_id,
            count,
            strategy,
            factor,
            executable = %self.executable,
            "Requesting workers"
        );
        let request = SpawnBody {
            session: self.session.clone(),
            count,
            executable: self.executable.clone(),
            package: self.package.clone(),
            args,
            strategy,
            factor,
        };
        self.node.spawn(request).await
    }
}
