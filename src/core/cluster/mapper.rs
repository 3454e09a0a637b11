// src/core/cluster/mapper.rs

//! Request dispatch across the cluster: single-node async and sync sends,
//! full scatter/gather fan-out, and the predicates higher layers use to
//! reason about routes.

use super::context::ClusterContext;
use super::partition_map::{NodeId, PartitionMap, ReplicaState};
use super::pool::ConnectionPool;
use super::routes::RouteRegistry;
use super::transport::{Connector, QueryParams, RpcRequest, RpcResponse};
use crate::core::errors::LatticeDBError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tracing::{debug, warn};

/// Poll interval while a synchronous dispatch waits for its response.
const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll interval while a cluster dispatch waits; each wakeup also probes
/// the registry for routes that vanished mid-flight.
const CLUSTER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Callback invoked with the response of an asynchronous dispatch.
pub type ResponseCallback = Box<dyn FnOnce(RpcResponse) + Send + 'static>;

/// One response payload. Owns its bytes; freed on drop.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub status: u16,
    pub error: bool,
    pub data: Bytes,
}

impl From<RpcResponse> for DataBlock {
    fn from(response: RpcResponse) -> Self {
        Self {
            status: response.status,
            error: response.error,
            data: Bytes::from(response.body),
        }
    }
}

/// The aggregate of a cluster fan-out. `route_error` is set when any route
/// failed, vanished mid-dispatch, or reported a transport error.
#[derive(Debug, Default)]
pub struct Responses {
    pub responses: Vec<DataBlock>,
    pub route_error: bool,
}

/// Shared state of one in-flight cluster dispatch. Every spawned send holds
/// an `Arc` to it; when the initiator returns early it flips `active` off
/// and stragglers discard their payloads. The last `Arc` frees the state.
struct ClusterDispatch {
    active: AtomicBool,
    requested: AtomicUsize,
    completed: AtomicUsize,
    route_error: AtomicBool,
    responses: Mutex<Vec<DataBlock>>,
    notify: Notify,
}

impl ClusterDispatch {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            requested: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            route_error: AtomicBool::new(false),
            responses: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.requested.load(Ordering::Relaxed)
    }

    fn complete(&self, response: RpcResponse) {
        if self.active.load(Ordering::Relaxed) {
            let mut responses = self.responses.lock();
            if response.error {
                self.route_error.store(true, Ordering::Relaxed);
            }
            responses.push(DataBlock::from(response));
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// The internode router. Owns the route registry, the connection pool and
/// the partition map; all dispatch goes through here.
pub struct Mapper {
    context: Arc<ClusterContext>,
    registry: RouteRegistry,
    pool: Arc<ConnectionPool>,
    partition_map: PartitionMap,
    connector: Arc<dyn Connector>,
    slot_counter: AtomicU64,
}

impl Mapper {
    pub fn new(context: Arc<ClusterContext>, connector: Arc<dyn Connector>) -> Self {
        let registry = RouteRegistry::new(context.node_id);
        let pool = Arc::new(ConnectionPool::new(context.connection_idle));
        Self {
            context,
            registry,
            pool,
            partition_map: PartitionMap::new(),
            connector,
            slot_counter: AtomicU64::new(1),
        }
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.context
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn partition_map(&self) -> &PartitionMap {
        &self.partition_map
    }

    /// Next correlation slot number. Monotonic across threads.
    pub fn get_slot_number(&self) -> u64 {
        self.slot_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers or updates a route. Pooled connections are untouched.
    pub fn add_route(&self, name: &str, node_id: NodeId, host: &str, port: u16) {
        self.registry.add_route(name, node_id, host, port);
    }

    /// Removes a route together with its cached connections.
    pub fn remove_route(&self, node_id: NodeId) {
        self.registry.remove_route(node_id);
        self.pool.drop_route(node_id);
    }

    /// Sends `request` to `route_id` and invokes `callback` with the
    /// response. The connection comes from the pool when one is cached and
    /// is returned there after a successful exchange. Returns false when no
    /// route is registered for `route_id`; the callback is not invoked.
    pub fn dispatch_async(
        &self,
        route_id: NodeId,
        request: RpcRequest,
        callback: ResponseCallback,
    ) -> bool {
        let Some(route) = self.registry.get_route(route_id) else {
            return false;
        };

        let pool = Arc::clone(&self.pool);
        let connector = Arc::clone(&self.connector);
        tokio::spawn(async move {
            let mut conn = match pool.acquire(route_id) {
                Some(conn) => conn,
                None => {
                    match connector.connect(&route.host, route.port).await {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(
                                "connect to route {} ({}:{}) failed: {}",
                                route_id, route.host, route.port, e
                            );
                            callback(RpcResponse::transport_error(e.to_string()));
                            return;
                        }
                    }
                }
            };

            match conn.request(&request).await {
                Ok(response) => {
                    pool.release(route_id, conn);
                    callback(response);
                }
                Err(e) => {
                    // The connection is dropped, not returned to the pool.
                    warn!("request to route {} failed: {}", route_id, e);
                    callback(RpcResponse::transport_error(e.to_string()));
                }
            }
        });
        true
    }

    /// Dispatches and waits for the response. Returns `None` when the route
    /// is unknown or the responding side went away. The wait polls so the
    /// caller's cancellation (dropping this future) takes effect promptly.
    pub async fn dispatch_sync(
        &self,
        route_id: NodeId,
        request: RpcRequest,
    ) -> Option<DataBlock> {
        let (tx, mut rx) = oneshot::channel();
        let sent = self.dispatch_async(
            route_id,
            request,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        if !sent {
            return None;
        }

        loop {
            match tokio::time::timeout(SYNC_POLL_INTERVAL, &mut rx).await {
                Ok(Ok(response)) => return Some(DataBlock::from(response)),
                Ok(Err(_)) => return None,
                Err(_) => {}
            }
        }
    }

    /// Scatter/gather: sends `request` to every registered route and
    /// collects the responses. When `internal_dispatch` is false the local
    /// node is skipped. Ends early with `route_error` when a route vanishes
    /// mid-flight or any response carries the transport error flag;
    /// whatever responses arrived by then are returned.
    pub async fn dispatch_cluster(
        &self,
        request: RpcRequest,
        internal_dispatch: bool,
    ) -> Responses {
        let shared = Arc::new(ClusterDispatch::new());
        let local_id = self.context.node_id;
        let mut dispatched: Vec<NodeId> = Vec::new();

        for route_id in self.registry.route_ids() {
            if !internal_dispatch && route_id == local_id {
                continue;
            }
            shared.requested.fetch_add(1, Ordering::Relaxed);
            let state = Arc::clone(&shared);
            let sent = self.dispatch_async(
                route_id,
                request.clone(),
                Box::new(move |response| state.complete(response)),
            );
            if !sent {
                shared.requested.fetch_sub(1, Ordering::Relaxed);
                shared.route_error.store(true, Ordering::Relaxed);
                break;
            }
            dispatched.push(route_id);
        }

        while !shared.is_complete() {
            let _ = tokio::time::timeout(CLUSTER_POLL_INTERVAL, shared.notify.notified()).await;

            // A route dropped during the request means its response will
            // never arrive; give up rather than wait for the full set.
            if dispatched.iter().any(|r| !self.registry.has_route(*r)) {
                shared.route_error.store(true, Ordering::Relaxed);
            }
            if shared.route_error.load(Ordering::Relaxed) {
                break;
            }
        }

        shared.active.store(false, Ordering::Relaxed);
        let responses = std::mem::take(&mut *shared.responses.lock());
        debug!(
            "cluster dispatch finished: {} responses, route_error={}",
            responses.len(),
            shared.route_error.load(Ordering::Relaxed)
        );
        Responses {
            responses,
            route_error: shared.route_error.load(Ordering::Relaxed),
        }
    }

    /// Cluster dispatch with a JSON document body.
    pub async fn dispatch_cluster_json(
        &self,
        method: &str,
        path: &str,
        params: QueryParams,
        document: &serde_json::Value,
        internal_dispatch: bool,
    ) -> Result<Responses, LatticeDBError> {
        let body =
            serde_json::to_vec(document).map_err(|e| LatticeDBError::Internal(e.to_string()))?;
        let request = RpcRequest::new(method, path, params, body);
        Ok(self.dispatch_cluster(request, internal_dispatch).await)
    }

    /// Distinct mapped node ids that have no route. Partitions referencing
    /// them cannot be reached until the topology is repaired.
    pub fn count_failed_routes(&self) -> usize {
        self.partition_map
            .mapped_node_ids()
            .into_iter()
            .filter(|id| !self.registry.has_route(*id))
            .count()
    }

    /// Per-node partition counts over `states`, sorted descending by count.
    /// The external rebalancer feeds on this.
    pub fn get_partition_counts_by_route(
        &self,
        states: &HashSet<ReplicaState>,
    ) -> Vec<(NodeId, usize)> {
        let mut result = Vec::new();
        for route_id in self.registry.get_active_routes() {
            let count = self
                .partition_map
                .get_partitions_by_node_id(route_id)
                .into_iter()
                .filter(|p| states.contains(&self.partition_map.get_state(*p, route_id)))
                .count();
            result.push((route_id, count));
        }
        result.sort_by(|a, b| b.1.cmp(&a.1));
        result
    }
}
