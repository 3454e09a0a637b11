// src/core/cluster/routes.rs

//! The name/id/endpoint dictionary of peer nodes.

use super::partition_map::NodeId;
use dashmap::DashMap;
use tracing::{debug, info};

/// An addressable peer node. Uniquely keyed by `node_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub node_id: NodeId,
    pub name: String,
    pub host: String,
    pub port: u16,
}

/// Registry of every route this node knows about, including its own.
///
/// Upserts are idempotent on the node id and never touch pooled
/// connections; dropping cached connections on route removal is the
/// mapper's job.
#[derive(Debug)]
pub struct RouteRegistry {
    local_id: NodeId,
    routes: DashMap<NodeId, Route>,
}

impl RouteRegistry {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            routes: DashMap::new(),
        }
    }

    /// Adds or updates a route. Re-adding an existing id replaces name and
    /// endpoint in place. The local node's own route rewrites the wildcard
    /// bind address so self-dispatch is always addressable.
    pub fn add_route(&self, name: &str, node_id: NodeId, host: &str, port: u16) {
        let host = if node_id == self.local_id && host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            host
        };

        let route = Route {
            node_id,
            name: name.to_string(),
            host: host.to_string(),
            port,
        };

        if self.routes.insert(node_id, route).is_some() {
            debug!("route {} ({}) updated: {}:{}", node_id, name, host, port);
        } else {
            info!("route {} ({}) added: {}:{}", node_id, name, host, port);
        }
    }

    /// Erases the route and its name mapping. True when a route was removed.
    pub fn remove_route(&self, node_id: NodeId) -> bool {
        let removed = self.routes.remove(&node_id).is_some();
        if removed {
            info!("route {} removed", node_id);
        }
        removed
    }

    /// Endpoint snapshot for a node, if registered.
    pub fn get_route(&self, node_id: NodeId) -> Option<Route> {
        self.routes.get(&node_id).map(|r| r.value().clone())
    }

    pub fn has_route(&self, node_id: NodeId) -> bool {
        self.routes.contains_key(&node_id)
    }

    pub fn get_route_name(&self, node_id: NodeId) -> Option<String> {
        self.routes.get(&node_id).map(|r| r.value().name.clone())
    }

    pub fn get_route_id(&self, name: &str) -> Option<NodeId> {
        self.routes
            .iter()
            .find(|r| r.value().name == name)
            .map(|r| *r.key())
    }

    pub fn list_routes(&self) -> Vec<Route> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn route_ids(&self) -> Vec<NodeId> {
        self.routes.iter().map(|r| *r.key()).collect()
    }

    /// Total registered routes, the local route included.
    pub fn count_routes(&self) -> usize {
        self.routes.len()
    }

    /// Every registered route is addressable, so this equals
    /// [`count_routes`](Self::count_routes). Kept as a distinct operation
    /// for observability callers.
    pub fn count_active_routes(&self) -> usize {
        self.routes.len()
    }

    /// Live route ids, sorted descending.
    pub fn get_active_routes(&self) -> Vec<NodeId> {
        let mut ids = self.route_ids();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    /// The minimum node id over all routes. Higher layers treat that node
    /// as the single elector for maintenance tasks.
    pub fn sentinel_id(&self) -> Option<NodeId> {
        self.routes.iter().map(|r| *r.key()).min()
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }
}
