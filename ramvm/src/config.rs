//! Configuration management for the ramvm CLI.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ramvm_proxmox::network::{DEFAULT_IP_PREFIX, DEFAULT_IP_TIMEOUT, DEFAULT_POLL_INTERVAL};
use ramvm_proxmox::{NodeParams, PollConfig, DEFAULT_MEMORY_MIB};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node used when `--node` is not given
    pub default_node: Option<String>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Deployment defaults
    pub deploy: DeployConfig,
    /// Known Proxmox nodes by name
    pub nodes: BTreeMap<String, NodeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Memory of new VMs in MiB
    pub memory: u32,
    /// Only addresses starting with this prefix are reported
    pub ip_prefix: String,
    pub ip_timeout_secs: u64,
    pub ip_poll_interval_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY_MIB,
            ip_prefix: DEFAULT_IP_PREFIX.to_string(),
            ip_timeout_secs: DEFAULT_IP_TIMEOUT.as_secs(),
            ip_poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

/// One `nodes.<name>` entry. Every key is optional here so that missing
/// ones can be reported together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub key_path: Option<String>,
    pub port: Option<u16>,
    pub storage: Option<String>,
    pub storage_path: Option<String>,
    pub ram_disk_size_gb: Option<u32>,
}

/// Node lookup failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node '{name}' not found in config (available: {})", .available.join(", "))]
    UnknownNode { name: String, available: Vec<String> },

    #[error("node '{name}' is missing required parameters: {}", .missing.join(", "))]
    MissingParameters { name: String, missing: Vec<&'static str> },

    #[error("no node given: pass --node or set default_node in the config file")]
    NoNode,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        // An empty file deserializes to YAML null.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load `--config` if given, otherwise `./config.yaml` when it exists.
    ///
    /// Only an explicitly requested file is required to exist. The second
    /// element is the file actually read, `None` for an empty configuration.
    pub fn load_or_default(explicit: Option<&str>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => PathBuf::from(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
            None => return Ok((Self::default(), None)),
        };
        let config = Self::load(&path)?;
        Ok((config, Some(path)))
    }

    /// Parameters of the node named on the command line, or of `default_node`.
    pub fn resolve_node(&self, cli_node: Option<&str>) -> Result<NodeParams, ConfigError> {
        let name = cli_node
            .or(self.default_node.as_deref())
            .ok_or(ConfigError::NoNode)?;

        let node = self.nodes.get(name).ok_or_else(|| ConfigError::UnknownNode {
            name: name.to_string(),
            available: self.nodes.keys().cloned().collect(),
        })?;

        let mut missing = Vec::new();
        let mut required = |key: &'static str, value: &Option<String>| -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    missing.push(key);
                    String::new()
                }
            }
        };
        let host = required("host", &node.host);
        let user = required("user", &node.user);
        let key_path = required("key_path", &node.key_path);
        let storage = required("storage", &node.storage);
        let storage_path = required("storage_path", &node.storage_path);

        if !missing.is_empty() {
            return Err(ConfigError::MissingParameters {
                name: name.to_string(),
                missing,
            });
        }

        Ok(NodeParams {
            name: name.to_string(),
            host,
            user,
            key_path: expand_home(&key_path),
            ssh_port: node.port,
            storage,
            storage_path,
            ram_disk_size_gb: node.ram_disk_size_gb,
        })
    }

    /// CLI value, then `deploy.memory`.
    pub fn memory(&self, cli_memory: Option<u32>) -> u32 {
        cli_memory.unwrap_or(self.deploy.memory)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            timeout: Duration::from_secs(self.deploy.ip_timeout_secs),
            interval: Duration::from_secs(self.deploy.ip_poll_interval_secs.max(1)),
            ip_prefix: self.deploy.ip_prefix.clone(),
        }
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}
