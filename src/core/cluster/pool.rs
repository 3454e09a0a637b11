// src/core/cluster/pool.rs

//! Per-route pool of reusable RPC connections.

use super::partition_map::NodeId;
use super::transport::NodeConnection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Route id reserved for ad-hoc connections that are never cached.
pub const ADHOC_ROUTE: NodeId = 0;

struct PooledConnection {
    stamp: Instant,
    conn: Box<dyn NodeConnection>,
}

/// Caches idle connections per route. Staleness is checked lazily: only an
/// acquire discards aged-out entries, so the pool may temporarily hold more
/// than its steady-state count.
pub struct ConnectionPool {
    idle_timeout: Duration,
    pools: Mutex<HashMap<NodeId, Vec<PooledConnection>>>,
}

impl ConnectionPool {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Pops the most-recently-used live connection for `route_id`. Entries
    /// idle beyond the timeout are discarded first.
    pub fn acquire(&self, route_id: NodeId) -> Option<Box<dyn NodeConnection>> {
        let mut pools = self.pools.lock();
        let pool = pools.get_mut(&route_id)?;
        pool.retain(|c| c.stamp.elapsed() < self.idle_timeout);
        pool.pop().map(|c| c.conn)
    }

    /// Returns a connection to the pool, stamped now. Handles for the
    /// ad-hoc route are dropped instead of cached.
    pub fn release(&self, route_id: NodeId, conn: Box<dyn NodeConnection>) {
        if route_id == ADHOC_ROUTE {
            return;
        }
        let mut pools = self.pools.lock();
        pools.entry(route_id).or_default().push(PooledConnection {
            stamp: Instant::now(),
            conn,
        });
    }

    /// Erases the pool for a route. Called on route removal.
    pub fn drop_route(&self, route_id: NodeId) {
        self.pools.lock().remove(&route_id);
    }

    /// Number of currently cached connections for a route, stale entries
    /// included.
    pub fn pooled_count(&self, route_id: NodeId) -> usize {
        self.pools
            .lock()
            .get(&route_id)
            .map(|p| p.len())
            .unwrap_or(0)
    }
}
