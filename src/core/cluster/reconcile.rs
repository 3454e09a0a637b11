// src/core/cluster/reconcile.rs

//! Applies an authoritative topology document to the local route registry
//! and partition map, invoking the caller's hooks for every compensating
//! action (serve a new partition, drop one, open or close a route).

use super::mapper::Mapper;
use super::partition_map::{NodeId, PartitionId, PartitionMap, ReplicaState};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Integration points into the environment. All four are invoked on the
/// reconciliation thread, outside any core lock; they must be short-lived.
pub trait TopologyHooks: Send + Sync {
    /// The local node should start serving `partition`.
    fn add_partition(&self, partition: PartitionId);
    /// The local node should stop serving `partition` and drop its data.
    fn drop_partition(&self, partition: PartitionId);
    /// A route unknown to the registry appeared in the topology.
    fn add_route(&self, name: &str, node_id: NodeId, host: &str, port: u16);
    /// A registered route is absent from the topology.
    fn drop_route(&self, node_id: NodeId);
}

impl Mapper {
    /// Applies an authoritative topology document: `/routes` first, then
    /// `/cluster`. Malformed entries are skipped with a warning; the rest
    /// of the document still applies. Bumps the local config version on
    /// completion.
    pub fn change_mapping(&self, document: &Value, hooks: &dyn TopologyHooks) {
        if let Some(routes) = document.get("routes").and_then(Value::as_array) {
            self.reconcile_routes(routes, hooks);
        }

        match document.get("cluster") {
            Some(cluster) => {
                self.partition_map()
                    .change_mapping(cluster, self.context().node_id, hooks);
            }
            None => error!("expecting /cluster in topology document"),
        }

        self.context().bump_config_version();
    }

    fn reconcile_routes(&self, routes: &[Value], hooks: &dyn TopologyHooks) {
        let mut provided: HashSet<NodeId> = HashSet::new();

        for entry in routes {
            let name = entry.get("name").and_then(Value::as_str).unwrap_or("");
            let node_id = entry.get("id").and_then(Value::as_i64).unwrap_or(0);
            let host = entry.get("host").and_then(Value::as_str).unwrap_or("");
            let port = entry
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(0);

            if name.is_empty() || node_id == 0 || host.is_empty() || port == 0 {
                warn!("skipping malformed route entry: {}", entry);
                continue;
            }

            provided.insert(node_id);
            if !self.registry().has_route(node_id) {
                hooks.add_route(name, node_id, host, port);
            }
        }

        let vanished: Vec<NodeId> = self
            .registry()
            .route_ids()
            .into_iter()
            .filter(|id| !provided.contains(id))
            .collect();
        for node_id in vanished {
            hooks.drop_route(node_id);
        }
    }
}

impl PartitionMap {
    /// Applies the `/cluster` subtree: upserts every provided
    /// (partition, node, state) triple, then clears every mapped triple the
    /// document no longer mentions. Hooks fire for partitions the local
    /// node gained or lost, after all locks are released.
    pub fn change_mapping(&self, cluster: &Value, local_id: NodeId, hooks: &dyn TopologyHooks) {
        let Some(partitions) = cluster.as_object() else {
            error!("topology /cluster is not an object");
            return;
        };

        let mut visited: HashSet<(PartitionId, NodeId, ReplicaState)> = HashSet::new();
        let mut new_partitions: BTreeSet<PartitionId> = BTreeSet::new();

        for (key, entry) in partitions {
            let Ok(partition) = key.parse::<PartitionId>() else {
                warn!("skipping non-numeric partition key '{}'", key);
                continue;
            };
            let Some(nodes) = entry.get("nodes").and_then(Value::as_array) else {
                continue;
            };

            for node in nodes {
                let Some(node_id) = node.get("node_id").and_then(Value::as_i64) else {
                    warn!("partition {}: node entry without node_id", partition);
                    continue;
                };
                let state = node
                    .get("state")
                    .and_then(Value::as_str)
                    .and_then(ReplicaState::from_wire_str);
                let Some(state) = state else {
                    warn!("partition {}: node {} has no usable state", partition, node_id);
                    continue;
                };

                if node_id == local_id && self.is_mapped(partition, node_id).is_none() {
                    new_partitions.insert(partition);
                }

                self.set_state(partition, node_id, state);
                visited.insert((partition, node_id, state));
            }
        }

        let dropped = self.retain_visited(&visited, local_id);
        for partition in dropped {
            info!("removing local partition {}", partition);
            hooks.drop_partition(partition);
        }

        for partition in new_partitions {
            info!("adding local partition {}", partition);
            hooks.add_partition(partition);
        }
    }
}

/// Convenience hooks for deployments where reconciliation should maintain
/// the mapper's own registry and no storage engine is attached yet.
pub struct RegistryHooks {
    mapper: Arc<Mapper>,
}

impl RegistryHooks {
    pub fn new(mapper: Arc<Mapper>) -> Self {
        Self { mapper }
    }
}

impl TopologyHooks for RegistryHooks {
    fn add_partition(&self, _partition: PartitionId) {}

    fn drop_partition(&self, _partition: PartitionId) {}

    fn add_route(&self, name: &str, node_id: NodeId, host: &str, port: u16) {
        self.mapper.add_route(name, node_id, host, port);
    }

    fn drop_route(&self, node_id: NodeId) {
        self.mapper.remove_route(node_id);
    }
}
