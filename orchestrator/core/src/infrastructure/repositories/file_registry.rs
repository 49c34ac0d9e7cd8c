// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// YAML-file backed cluster registry.
//
// The file holds one record per known node:
//
//   nodes:
//     - address: 10.0.0.5:8700
//       processor_count: 8
//       machine_name: alpha
//       is_active: true
//
// Saves go to a sibling temp file first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::cluster::ClusterNode;
use crate::domain::repository::{ClusterRegistryStore, RepositoryError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    nodes: Vec<ClusterNode>,
}

#[derive(Debug, Clone)]
pub struct FileClusterRegistryStore {
    path: PathBuf,
}

impl FileClusterRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ClusterRegistryStore for FileClusterRegistryStore {
    async fn load(&self) -> Result<Vec<ClusterNode>, RepositoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted cluster registry");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile = serde_yaml::from_str(&content)?;
        Ok(file.nodes)
    }

    async fn save(&self, nodes: &[ClusterNode]) -> Result<(), RepositoryError> {
        let yaml = serde_yaml::to_string(&RegistryFile { nodes: nodes.to_vec() })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&staging, yaml).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
