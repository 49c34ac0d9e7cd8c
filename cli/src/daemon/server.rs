// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon composition root: configuration to a serving [`NodeVisor`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use visor_core::application::{NodeDependencies, NodeSettings, NodeVisor};
use visor_core::domain::node_config::NodeConfigManifest;
use visor_core::infrastructure::http::{AgentDirectory, HttpAgentClient, HttpClusterClient};
use visor_core::infrastructure::process::TokioProcessLauncher;
use visor_core::infrastructure::repositories::FileClusterRegistryStore;
use visor_core::presentation;

use super::{remove_pid_file, write_pid_file};
use crate::logging;

/// Per-call timeout of node to node and node to agent requests.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn start_daemon(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    log_level: Option<String>,
) -> Result<()> {
    let (mut config, config_path) =
        NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(port) = port {
        config.spec.network.port = port;
    }
    config.validate().context("Configuration validation failed")?;

    let log_config = config.logging();
    let level = log_level.unwrap_or(log_config.level);
    logging::init_daemon(&level, &log_config.format)?;

    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!("Visor daemon starting (PID: {})", pid);
    if let Some(path) = &config_path {
        info!("Configuration loaded from {:?}", path);
    }

    if let Some(metrics_port) = config.metrics_port() {
        logging::install_prometheus(&config.spec.network.bind_address, metrics_port)?;
    }

    let (node, directory) = build_node(&config, config_path.as_deref())?;
    node.start().await;
    info!(node = %node.address(), "Node registered with cluster");

    let addr = format!("{}:{}", config.spec.network.bind_address, config.spec.network.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            node.stop().await;
            return Err(e).with_context(|| format!("Failed to bind to {}", addr));
        }
    };
    info!("Daemon listening on {}", addr);

    let served = axum::serve(listener, presentation::app(node.clone(), directory))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Daemon shutting down");
    node.stop().await;
    served.context("HTTP server failed")
}

/// Wire the node's ports to their production adapters.
pub fn build_node(
    config: &NodeConfigManifest,
    config_path: Option<&Path>,
) -> Result<(Arc<NodeVisor>, Arc<AgentDirectory>)> {
    let self_node = config.self_node()?;
    let seeds = config.seeds()?;
    let apps_dir = PathBuf::from(&config.spec.storage.apps_dir);
    std::fs::create_dir_all(&apps_dir)
        .with_context(|| format!("Failed to create apps directory {:?}", apps_dir))?;

    let registry_path = config.registry_path(config_path);
    info!("Cluster registry at {:?}", registry_path);

    let directory = Arc::new(AgentDirectory::new());
    let cluster = HttpClusterClient::new(RPC_TIMEOUT).context("Failed to create cluster client")?;
    let agents =
        HttpAgentClient::new(directory.clone(), RPC_TIMEOUT).context("Failed to create agent client")?;

    let settings = NodeSettings {
        node_url: format!("http://{}", self_node.address),
        self_node,
        seeds,
        apps_dir,
        notify_timeout: Duration::from_secs(config.spec.cluster.notify_timeout_secs),
    };
    let node = NodeVisor::new(
        settings,
        NodeDependencies {
            registry_store: Arc::new(FileClusterRegistryStore::new(registry_path)),
            cluster: Arc::new(cluster),
            agents: Arc::new(agents),
            launcher: Arc::new(TokioProcessLauncher::new().with_inherited_stdio(true)),
        },
    );
    Ok((Arc::new(node), directory))
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonClient;
    use std::future::IntoFuture;

    fn local_config(dir: &Path, port: u16) -> NodeConfigManifest {
        let mut config = NodeConfigManifest::default();
        config.spec.node.address = format!("127.0.0.1:{}", port);
        config.spec.node.processor_count = Some(4);
        config.spec.storage.apps_dir = dir.join("apps").to_string_lossy().into_owned();
        config.spec.cluster.registry_path = dir.join("cluster.yaml").to_string_lossy().into_owned();
        config.spec.cluster.notify_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn test_built_node_serves_management_api() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = local_config(dir.path(), port);

        let (node, directory) = build_node(&config, None).unwrap();
        assert!(dir.path().join("apps").is_dir());
        node.start().await;
        let server = tokio::spawn(axum::serve(listener, presentation::app(node.clone(), directory)).into_future());

        let client = DaemonClient::new("127.0.0.1", port).unwrap();
        let nodes = client.cluster_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address.to_string(), format!("127.0.0.1:{}", port));
        assert_eq!(nodes[0].processor_count, 4);

        let info = client.cluster_info().await.unwrap();
        assert!(info.sessions.is_empty());

        node.stop().await;
        server.abort();
        assert!(dir.path().join("cluster.yaml").exists());
    }

    #[test]
    fn test_invalid_seed_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path(), 8700);
        config.spec.cluster.seeds = vec!["not an address".to_string()];
        assert!(build_node(&config, None).is_err());
    }
}
