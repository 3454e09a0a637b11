// src/core/cluster/mod.rs

//! This module contains all logic related to partition mapping and
//! internode routing: the replica slot tables, the route registry, the
//! connection pool, request dispatch, topology reconciliation, and the
//! durable form of both documents.

pub mod context;
pub mod mapper;
pub mod monitor;
pub mod partition_map;
pub mod persistence;
pub mod pool;
pub mod reconcile;
pub mod routes;
pub mod transport;

// Re-export key types for easier access from other modules.
pub use context::{Cluster, ClusterContext, node_id_from_name, now_ms};
pub use mapper::{DataBlock, Mapper, ResponseCallback, Responses};
pub use partition_map::{MAP_DEPTH, NodeId, PartitionId, PartitionMap, ReplicaSlot, ReplicaState};
pub use persistence::{PartitionsDocument, PersistedPartition, PersistedReplica, PersistedRoute};
pub use pool::ConnectionPool;
pub use reconcile::{RegistryHooks, TopologyHooks};
pub use routes::{Route, RouteRegistry};
pub use transport::{Connector, NodeConnection, QueryParams, RpcRequest, RpcResponse, TcpConnector};
