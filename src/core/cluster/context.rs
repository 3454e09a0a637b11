// src/core/cluster/context.rs

//! Process-wide cluster identity and lifecycle.
//!
//! `ClusterContext` carries what every component needs to know about this
//! node: its derived id, its advertised endpoint, the partition-count
//! constant, and the config version peers compare against. It is built once
//! at startup and passed by `Arc` to every constructor.

use super::mapper::Mapper;
use super::monitor::ClusterMonitorTask;
use super::partition_map::NodeId;
use super::transport::Connector;
use crate::config::Config;
use crate::core::errors::LatticeDBError;
use crc::{CRC_64_ECMA_182, Crc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

const NODE_ID_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Derives the stable 64-bit node id from a configured node name.
pub fn node_id_from_name(name: &str) -> NodeId {
    NODE_ID_ALGO.checksum(name.as_bytes()) as NodeId
}

/// Current wall clock in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Identity and constants of the local node, plus the mutable config
/// version.
#[derive(Debug)]
pub struct ClusterContext {
    pub node_name: String,
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub total_partitions: u32,
    pub replication: usize,
    pub data_dir: PathBuf,
    pub test_mode: bool,
    pub monitor_interval: Duration,
    pub connection_idle: Duration,
    config_version: AtomicU64,
}

impl ClusterContext {
    pub fn from_config(config: &Config) -> Self {
        let node_id = node_id_from_name(&config.node_name);
        Self {
            node_name: config.node_name.clone(),
            node_id,
            host: config.host.clone(),
            port: config.port,
            total_partitions: config.cluster.total_partitions,
            replication: config.cluster.replication,
            data_dir: PathBuf::from(&config.data_dir),
            test_mode: config.test_mode,
            monitor_interval: Duration::from_millis(config.cluster.monitor_interval_ms),
            connection_idle: Duration::from_millis(config.cluster.connection_idle_ms),
            config_version: AtomicU64::new(0),
        }
    }

    pub fn config_version(&self) -> u64 {
        self.config_version.load(Ordering::Relaxed)
    }

    /// Adopts a version received from a peer.
    pub fn set_config_version(&self, version: u64) {
        self.config_version.store(version, Ordering::Relaxed);
    }

    /// Stamps a fresh version after a local mapping change and returns it.
    pub fn bump_config_version(&self) -> u64 {
        let version = now_ms();
        self.config_version.store(version, Ordering::Relaxed);
        version
    }
}

/// The assembled cluster core: context, mapper, and the background monitor.
/// Startup loads the persisted route list and partition map (in that
/// order); shutdown stops the monitor and persists both documents.
pub struct Cluster {
    context: Arc<ClusterContext>,
    mapper: Arc<Mapper>,
    shutdown_tx: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Result<Self, LatticeDBError> {
        let context = Arc::new(ClusterContext::from_config(config));
        info!(
            "cluster core starting: node '{}' (id {}), {} partitions",
            context.node_name, context.node_id, context.total_partitions
        );

        let mapper = Arc::new(Mapper::new(context.clone(), connector));
        mapper.load_routes()?;
        mapper.load_partitions()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            context,
            mapper,
            shutdown_tx,
            monitor: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.context
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    /// Spawns the periodic cluster monitor. Idempotent: a second call
    /// replaces nothing if the monitor already runs.
    pub fn start_monitor(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }
        let task = ClusterMonitorTask::new(self.context.clone(), self.mapper.clone());
        let handle = tokio::spawn(task.run(self.shutdown_tx.subscribe()));
        *monitor = Some(handle);
    }

    /// Stops the monitor and persists the partition map and route list.
    pub async fn shutdown(&self) -> Result<(), LatticeDBError> {
        let _ = self.shutdown_tx.send(());
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.mapper.save_partitions()?;
        self.mapper.save_routes()?;
        info!("cluster core shut down");
        Ok(())
    }
}
