// src/core/cluster/persistence.rs

//! Durable form of the partition map and route list.
//!
//! Both documents are written whole, through a temp file and an atomic
//! rename. Only the three active replica states are ever persisted; free
//! and failed slots simply do not appear and stay free after a reload.

use super::mapper::Mapper;
use super::partition_map::{NodeId, PartitionMap, ReplicaState};
use crate::core::errors::LatticeDBError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const PARTITIONS_FILE: &str = "partitions.json";
const ROUTES_FILE: &str = "routes.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedReplica {
    pub node_id: NodeId,
    pub state: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedPartition {
    pub nodes: Vec<PersistedReplica>,
}

/// Object keyed by the partition id as a decimal string.
pub type PartitionsDocument = BTreeMap<String, PersistedPartition>;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedRoute {
    pub name: String,
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl PartitionMap {
    /// Projects the map onto its durable form. Free and failed slots are
    /// omitted.
    pub fn to_document(&self) -> PartitionsDocument {
        let mut document = PartitionsDocument::new();
        for (partition, slots) in self.snapshot() {
            let entry: &mut PersistedPartition = document.entry(partition.to_string()).or_default();
            for slot in slots {
                if let Some(state) = slot.state.as_wire_str() {
                    entry.nodes.push(PersistedReplica {
                        node_id: slot.node_id,
                        state: state.to_string(),
                    });
                }
            }
        }
        document
    }

    /// Replays a persisted document into the map. Entries with an unknown
    /// state literal or a missing node id are ignored, not errors.
    pub fn apply_document(&self, document: &PartitionsDocument) {
        for (key, entry) in document {
            let Ok(partition) = key.parse() else {
                warn!("ignoring non-numeric partition key '{}' in persisted map", key);
                continue;
            };
            for replica in &entry.nodes {
                if replica.node_id == 0 {
                    continue;
                }
                let Some(state) = ReplicaState::from_wire_str(&replica.state) else {
                    continue;
                };
                self.set_state(partition, replica.node_id, state);
            }
        }
    }
}

impl Mapper {
    /// Writes the partition map document. Suppressed in test mode.
    pub fn save_partitions(&self) -> Result<(), LatticeDBError> {
        if self.context().test_mode {
            return Ok(());
        }
        let document = self.partition_map().to_document();
        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| LatticeDBError::Internal(e.to_string()))?;
        let path = self.context().data_dir.join(PARTITIONS_FILE);
        write_atomic(&path, &content)?;
        info!("partition map saved to {}", path.display());
        Ok(())
    }

    /// Clears the map and replays the persisted document. A missing file is
    /// created empty. Suppressed in test mode.
    pub fn load_partitions(&self) -> Result<(), LatticeDBError> {
        self.partition_map().clear();
        if self.context().test_mode {
            return Ok(());
        }

        let path = self.context().data_dir.join(PARTITIONS_FILE);
        if !path.exists() {
            write_atomic(&path, "{}")?;
            return Ok(());
        }

        let content = fs::read_to_string(&path)?;
        let document: PartitionsDocument = serde_json::from_str(&content)
            .map_err(|e| LatticeDBError::BadDocument(format!("{}: {e}", path.display())))?;
        self.partition_map().apply_document(&document);
        info!("partition map loaded from {}", path.display());
        Ok(())
    }

    /// Writes the route list document. Suppressed in test mode.
    pub fn save_routes(&self) -> Result<(), LatticeDBError> {
        if self.context().test_mode {
            return Ok(());
        }
        let mut routes: Vec<PersistedRoute> = self
            .registry()
            .list_routes()
            .into_iter()
            .map(|r| PersistedRoute {
                name: r.name,
                id: r.node_id,
                host: r.host,
                port: r.port,
            })
            .collect();
        routes.sort_by_key(|r| r.id);

        let content = serde_json::to_string_pretty(&routes)
            .map_err(|e| LatticeDBError::Internal(e.to_string()))?;
        let path = self.context().data_dir.join(ROUTES_FILE);
        write_atomic(&path, &content)?;
        info!("cluster routes saved to {}", path.display());
        Ok(())
    }

    /// Loads the route list. A missing file is seeded by an immediate save.
    /// Entries with an empty host or a zero id or port are skipped.
    /// Suppressed in test mode.
    pub fn load_routes(&self) -> Result<(), LatticeDBError> {
        if self.context().test_mode {
            return Ok(());
        }

        let path = self.context().data_dir.join(ROUTES_FILE);
        if !path.exists() {
            return self.save_routes();
        }

        let content = fs::read_to_string(&path)?;
        let routes: Vec<PersistedRoute> = serde_json::from_str(&content)
            .map_err(|e| LatticeDBError::BadDocument(format!("{}: {e}", path.display())))?;

        for route in routes {
            if route.id == 0 || route.host.is_empty() || route.port == 0 {
                warn!("skipping malformed persisted route: {:?}", route);
                continue;
            }
            self.add_route(&route.name, route.id, &route.host, route.port);
        }
        info!("cluster routes loaded from {}", path.display());
        Ok(())
    }
}

/// Whole-document write through a temp file and rename, so readers never
/// observe a torn file.
fn write_atomic(path: &Path, content: &str) -> Result<(), LatticeDBError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension(format!("tmp-{}", rand::random::<u32>()));
    fs::write(&temp_path, content)?;
    fs::rename(temp_path, path)?;
    Ok(())
}
