// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deployment packages: tar archives unpacked per session under the apps root.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::domain::session::SessionId;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Package I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Package task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct PackageDeployer {
    apps_root: PathBuf,
}

impl PackageDeployer {
    pub fn new(apps_root: impl Into<PathBuf>) -> Self {
        Self {
            apps_root: apps_root.into(),
        }
    }

    pub fn apps_root(&self) -> &Path {
        &self.apps_root
    }

    /// `apps_root/app-{sessionId}`
    pub fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.apps_root.join(format!("app-{}", session_id))
    }

    /// Directory agents of the session start in: the unpacked package when
    /// there is one, otherwise the apps root itself.
    pub fn working_dir(&self, session_id: SessionId) -> PathBuf {
        let dir = self.session_dir(session_id);
        if dir.is_dir() {
            dir
        } else {
            self.apps_root.clone()
        }
    }

    /// Unpack `package` for the session unless that already happened.
    pub async fn unpack(&self, session_id: SessionId, package: Vec<u8>) -> Result<PathBuf, PackageError> {
        let dir = self.session_dir(session_id);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(dir);
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|source| PackageError::Io {
            path: dir.clone(),
            source,
        })?;

        let target = dir.clone();
        let size = package.len();
        tokio::task::spawn_blocking(move || {
            tar::Archive::new(Cursor::new(package))
                .unpack(&target)
                .map_err(|source| PackageError::Io { path: target, source })
        })
        .await
        .map_err(|e| PackageError::Task(e.to_string()))??;

        info!(session_id = %session_id, dir = %dir.display(), bytes = size, "Unpacked session package");
        Ok(dir)
    }
}

/// Build a package from the contents of `dir`.
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>, PackageError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", dir)
        .map_err(|source| PackageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    builder.into_inner().map_err(|source| PackageError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
