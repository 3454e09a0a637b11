// src/core/cluster/monitor.rs

//! A background task that periodically inspects the cluster view and
//! reports partitions below (or above) their target replication and mapped
//! nodes that have lost their route.

use super::context::ClusterContext;
use super::mapper::Mapper;
use super::partition_map::ReplicaState;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct ClusterMonitorTask {
    context: Arc<ClusterContext>,
    mapper: Arc<Mapper>,
}

impl ClusterMonitorTask {
    pub fn new(context: Arc<ClusterContext>, mapper: Arc<Mapper>) -> Self {
        Self { context, mapper }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("cluster monitor started");
        let mut interval = tokio::time::interval(self.context.monitor_interval);
        let serving_states: HashSet<ReplicaState> =
            [ReplicaState::ActiveOwner, ReplicaState::ActiveClone]
                .into_iter()
                .collect();

        let mut last_missing = 0usize;
        let mut last_unroutable = 0usize;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check(&serving_states, &mut last_missing, &mut last_unroutable);
                }
                _ = shutdown_rx.recv() => {
                    info!("cluster monitor shutting down");
                    return;
                }
            }
        }
    }

    fn check(
        &self,
        serving_states: &HashSet<ReplicaState>,
        last_missing: &mut usize,
        last_unroutable: &mut usize,
    ) {
        let missing = self.mapper.partition_map().get_missing_partitions(
            self.context.total_partitions,
            serving_states,
            self.context.replication,
        );
        if missing.len() != *last_missing {
            if missing.is_empty() {
                info!("all partitions at target replication");
            } else {
                warn!(
                    "{} of {} partitions off target replication: {:?}",
                    missing.len(),
                    self.context.total_partitions,
                    missing
                );
            }
            *last_missing = missing.len();
        }

        let unroutable = self.mapper.count_failed_routes();
        if unroutable != *last_unroutable {
            if unroutable == 0 {
                info!("all mapped nodes routable again");
            } else {
                warn!("{} mapped node(s) have no route", unroutable);
            }
            *last_unroutable = unroutable;
        }

        debug!(
            "monitor tick: {} routes, {} missing partitions",
            self.mapper.registry().count_routes(),
            missing.len()
        );
    }
}
