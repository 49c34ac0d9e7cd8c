// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the registry store defined in the domain
//! layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and reload the cluster membership registry
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **FileClusterRegistryStore** - YAML file rewritten atomically on every save
//! - **InMemoryClusterRegistryStore** - Ephemeral storage for tests and local mode

pub mod file_registry;

pub use file_registry::FileClusterRegistryStore;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::cluster::ClusterNode;
use crate::domain::repository::{ClusterRegistryStore, RepositoryError};

/// In-memory registry store
#[derive(Debug, Default)]
pub struct InMemoryClusterRegistryStore {
    nodes: RwLock<Vec<ClusterNode>>,
}

impl InMemoryClusterRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `nodes`, as if persisted by an earlier run.
    pub fn with_nodes(nodes: Vec<ClusterNode>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }
}

#[async_trait]
impl ClusterRegistryStore for InMemoryClusterRegistryStore {
    async fn load(&self) -> Result<Vec<ClusterNode>, RepositoryError> {
        Ok(self.nodes.read().clone())
    }

    async fn save(&self, nodes: &[ClusterNode]) -> Result<(), RepositoryError> {
        *self.nodes.write() = nodes.to_vec();
        Ok(())
    }
}
