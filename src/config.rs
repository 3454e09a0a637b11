// src/config.rs

//! Manages node configuration: loading, defaults, and validation.

use crate::core::cluster::MAP_DEPTH;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;

/// Cluster-specific tunables.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// The process-wide partition count. Fixed at startup; every node in a
    /// cluster must agree on it.
    #[serde(default = "default_total_partitions")]
    pub total_partitions: u32,
    /// Target replica count per partition.
    #[serde(default = "default_replication")]
    pub replication: usize,
    /// Idle connections older than this are discarded on the next acquire.
    #[serde(default = "default_connection_idle_ms")]
    pub connection_idle_ms: u64,
    /// Interval of the background cluster monitor.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_total_partitions() -> u32 {
    32
}
fn default_replication() -> usize {
    2
}
fn default_connection_idle_ms() -> u64 {
    120_000
}
fn default_monitor_interval_ms() -> u64 {
    1_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            total_partitions: default_total_partitions(),
            replication: default_replication(),
            connection_idle_ms: default_connection_idle_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    node_name: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    test_mode: bool,
    #[serde(default)]
    cluster: ClusterConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7080
}
fn default_data_dir() -> String {
    "lattice_data".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The validated node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_name: String,
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub log_level: String,
    /// Suppresses all persistence; used by the test suites.
    pub test_mode: bool,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "node-1".to_string(),
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            test_mode: false,
            cluster: ClusterConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            node_name: raw.node_name,
            host: raw.host,
            port: raw.port,
            data_dir: raw.data_dir,
            log_level: raw.log_level,
            test_mode: raw.test_mode,
            cluster: raw.cluster,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(anyhow!("node_name cannot be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.cluster.total_partitions == 0 {
            return Err(anyhow!("cluster.total_partitions cannot be 0"));
        }
        if self.cluster.replication == 0 {
            return Err(anyhow!("cluster.replication cannot be 0"));
        }
        if self.cluster.replication > MAP_DEPTH {
            return Err(anyhow!(
                "cluster.replication cannot exceed the replica slot capacity ({MAP_DEPTH})"
            ));
        }
        if self.cluster.connection_idle_ms == 0 {
            return Err(anyhow!("cluster.connection_idle_ms cannot be 0"));
        }
        if self.cluster.monitor_interval_ms == 0 {
            return Err(anyhow!("cluster.monitor_interval_ms cannot be 0"));
        }
        Ok(())
    }
}
