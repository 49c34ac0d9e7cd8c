// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for cluster node daemons, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity and advertised capacity
// - Cluster seeds and registry persistence
// - Deployment storage locations
// - Network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::cluster::{ClusterNode, NodeAddress};

pub const API_VERSION: &str = "visor.duovia.dev/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "visor.duovia.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    /// Node metadata (name, labels, version)
    pub metadata: ManifestMetadata,

    /// Node configuration specification
    pub spec: NodeConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Node configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// `host:port` other nodes use to reach this one
    #[serde(default = "default_node_address")]
    pub address: String,

    /// Defaults to the host name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_name: Option<String>,

    /// Defaults to the available parallelism of this machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_count: Option<u16>,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            address: default_node_address(),
            machine_name: None,
            processor_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Other nodes contacted at startup to fetch the cluster view
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Persisted membership registry. Relative paths resolve against the
    /// config file's directory.
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    /// Overall wait for cross-node notification fan-outs
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: vec![],
            registry_path: default_registry_path(),
            notify_timeout_secs: default_notify_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root under which session packages are unpacked (`app-{sessionId}`)
    #[serde(default = "default_apps_dir")]
    pub apps_dir: String,

    #[serde(default = "default_packages_dir")]
    pub packages_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            apps_dir: default_apps_dir(),
            packages_dir: default_packages_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_node_address() -> String {
    format!("127.0.0.1:{}", default_api_port())
}

fn default_registry_path() -> String {
    "cluster.yaml".to_string()
}

fn default_notify_timeout() -> u64 {
    600
}

fn default_apps_dir() -> String {
    default_data_dir().join("apps").to_string_lossy().into_owned()
}

fn default_packages_dir() -> String {
    default_data_dir().join("packages").to_string_lossy().into_owned()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("visor"))
        .unwrap_or_else(|| PathBuf::from(".visor"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8700
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let hostname = local_machine_name().unwrap_or_else(|| "visor-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

fn local_machine_name() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. VISOR_CONFIG_PATH environment variable
    /// 2. ./visor-config.yaml (working directory)
    /// 3. ~/.visor/config.yaml (user home)
    /// 4. /etc/visor/config.yaml (system, Unix) or C:\ProgramData\Visor\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("VISOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./visor-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".visor").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/visor/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Visor\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default.
    ///
    /// Returns the manifest together with the file it came from, if any.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        // 1. Explicit CLI path (Fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok((config, Some(path)));
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path)?;
            config.apply_env_overrides();
            Ok((config, Some(config_path)))
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok((config, None))
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VISOR_NODE_ADDRESS") {
            tracing::info!("Environment override: VISOR_NODE_ADDRESS={}", val);
            self.spec.node.address = val;
        }

        if let Ok(val) = std::env::var("VISOR_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: VISOR_PORT={}", port);
                    self.spec.network.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for VISOR_PORT: '{}'. Expected a port number. Ignoring.", val);
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if let Err(e) = self.spec.node.address.parse::<NodeAddress>() {
            anyhow::bail!("spec.node.address: {}", e);
        }

        if self.spec.node.processor_count == Some(0) {
            anyhow::bail!("spec.node.processor_count must be at least 1");
        }

        for seed in &self.spec.cluster.seeds {
            if let Err(e) = seed.parse::<NodeAddress>() {
                anyhow::bail!("spec.cluster.seeds: {}", e);
            }
        }

        if self.spec.cluster.notify_timeout_secs == 0 {
            anyhow::bail!("spec.cluster.notify_timeout_secs must be greater than zero");
        }

        if let Some(logging) = self.spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if logging.format != "json" && logging.format != "text" {
                anyhow::bail!("Invalid logging format '{}'. Expected 'json' or 'text'", logging.format);
            }
        }

        Ok(())
    }

    /// Registry entry describing this node, with machine name and processor
    /// count filled in from the host when not configured.
    pub fn self_node(&self) -> anyhow::Result<ClusterNode> {
        let address: NodeAddress = self
            .spec
            .node
            .address
            .parse()
            .map_err(|e| anyhow::anyhow!("spec.node.address: {}", e))?;
        let machine_name = self
            .spec
            .node
            .machine_name
            .clone()
            .or_else(local_machine_name)
            .unwrap_or_else(|| self.metadata.name.clone());
        let processor_count = self.spec.node.processor_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| u16::try_from(n.get()).unwrap_or(u16::MAX))
                .unwrap_or(1)
        });
        Ok(ClusterNode::new(address, processor_count, machine_name))
    }

    pub fn seeds(&self) -> anyhow::Result<Vec<NodeAddress>> {
        self.spec
            .cluster
            .seeds
            .iter()
            .map(|s| s.parse().map_err(|e| anyhow::anyhow!("spec.cluster.seeds: {}", e)))
            .collect()
    }

    /// Registry file path, resolved against the directory of `config_path`.
    pub fn registry_path(&self, config_path: Option<&Path>) -> PathBuf {
        let configured = PathBuf::from(&self.spec.cluster.registry_path);
        if configured.is_absolute() {
            return configured;
        }
        match config_path.and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(configured),
            _ => default_data_dir().join(configured),
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.clone())
            .unwrap_or_else(|| LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            })
    }

    /// Prometheus exporter port, when metrics are enabled.
    pub fn metrics_port(&self) -> Option<u16> {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.metrics.as_ref())
            .filter(|m| m.enabled)
            .map(|m| m.port)
    }
}
