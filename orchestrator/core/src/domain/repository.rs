// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contract for the cluster membership registry. The registry is
//! reloaded at startup and rewritten after every membership mutation.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ClusterRegistryStore` | `Vec<ClusterNode>` | `FileClusterRegistryStore`, `InMemoryClusterRegistryStore` |

use async_trait::async_trait;
use crate::domain::cluster::ClusterNode;

/// Repository interface for the node registry.
#[async_trait]
pub trait ClusterRegistryStore: Send + Sync {
    /// Load the persisted registry. An absent store is an empty registry.
    async fn load(&self) -> Result<Vec<ClusterNode>, RepositoryError>;

    /// Replace the persisted registry with `nodes`.
    async fn save(&self, nodes: &[ClusterNode]) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Storage(err.to_string())
    }
}

impl From<serde_yaml::Error> for RepositoryError {
    fn from(err: serde_yaml::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
