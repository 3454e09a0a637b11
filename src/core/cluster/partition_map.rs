// src/core/cluster/partition_map.rs

//! The replicated partition-to-node mapping.
//!
//! Every node in the cluster holds a full copy of this map. Each partition
//! owns a fixed table of [`MAP_DEPTH`] replica slots; a slot binds a node id
//! to a [`ReplicaState`]. The map is the single source of truth for routing
//! decisions: any state at or above [`ReplicaState::Routable`] receives
//! traffic.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Stable 64-bit identifier of a cluster member, derived from its name.
pub type NodeId = i64;

/// Partition index in `[0, total_partitions)`.
pub type PartitionId = u32;

/// The fixed replica-slot capacity per partition.
pub const MAP_DEPTH: usize = 6;

/// The state of one replica slot. Variant order is meaningful: any state
/// at or above `Routable` is eligible to receive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReplicaState {
    /// Unallocated slot. A free slot always carries node id 0.
    Free,
    /// Failed node or instance.
    Failed,
    /// Threshold marker for comparisons.
    Routable,
    /// Active and the authoritative holder of the partition.
    ActiveOwner,
    /// Active, up-to-date replica. Serves reads, not writes.
    ActiveClone,
    /// Active but still being built. Serves neither reads nor writes.
    ActivePlaceholder,
}

impl ReplicaState {
    /// True for any state that receives routed traffic.
    pub fn is_routable(self) -> bool {
        self >= ReplicaState::Routable
    }

    /// The literal used in topology and persisted documents. Only the three
    /// active states have a wire form; `Free` and `Failed` are never written.
    pub fn as_wire_str(self) -> Option<&'static str> {
        match self {
            ReplicaState::ActiveOwner => Some("active_owner"),
            ReplicaState::ActiveClone => Some("active_clone"),
            ReplicaState::ActivePlaceholder => Some("active_build"),
            _ => None,
        }
    }

    /// Parses a wire literal. Unknown literals yield `None` and the caller
    /// skips the entry.
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "active_owner" => Some(ReplicaState::ActiveOwner),
            "active_clone" => Some(ReplicaState::ActiveClone),
            "active_build" => Some(ReplicaState::ActivePlaceholder),
            _ => None,
        }
    }
}

/// One (node, state) binding inside a partition's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaSlot {
    pub node_id: NodeId,
    pub state: ReplicaState,
}

impl ReplicaSlot {
    const EMPTY: ReplicaSlot = ReplicaSlot {
        node_id: 0,
        state: ReplicaState::Free,
    };

    pub fn is_free(&self) -> bool {
        self.state == ReplicaState::Free
    }

    fn clear(&mut self) {
        *self = ReplicaSlot::EMPTY;
    }
}

/// The slot table of a single partition, guarded by its own lock so that
/// mutations on distinct partitions do not contend.
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Mutex<[ReplicaSlot; MAP_DEPTH]>,
}

impl SlotTable {
    fn new() -> Self {
        Self {
            slots: Mutex::new([ReplicaSlot::EMPTY; MAP_DEPTH]),
        }
    }

    /// Places a new binding in the first free slot. False when the table is full.
    fn add_mapping(&self, node_id: NodeId, state: ReplicaState) -> bool {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.is_free() {
                slot.node_id = node_id;
                slot.state = state;
                return true;
            }
        }
        false
    }

    /// Clears the slot matching the exact (node, state) pair.
    fn remove_mapping(&self, node_id: NodeId, state: ReplicaState) -> bool {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.node_id == node_id && slot.state == state {
                slot.clear();
                return true;
            }
        }
        false
    }

    fn is_mapped(&self, node_id: NodeId) -> Option<ReplicaSlot> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| !s.is_free() && s.node_id == node_id)
            .copied()
    }

    fn is_owner(&self, node_id: NodeId) -> bool {
        let slots = self.slots.lock();
        slots
            .iter()
            .any(|s| s.state == ReplicaState::ActiveOwner && s.node_id == node_id)
    }

    fn get_state(&self, node_id: NodeId) -> ReplicaState {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|s| !s.is_free() && s.node_id == node_id)
            .map(|s| s.state)
            .unwrap_or(ReplicaState::Free)
    }

    fn set_state(&self, node_id: NodeId, state: ReplicaState) -> bool {
        {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.iter_mut().find(|s| !s.is_free() && s.node_id == node_id) {
                slot.state = state;
                return true;
            }
        }
        self.add_mapping(node_id, state)
    }

    /// Marks `node_id` as the owner and demotes any other owner to clone.
    /// The demotion happens even when `node_id` cannot be placed afterwards
    /// because the table is full; in that case the call returns false.
    fn set_owner(&self, node_id: NodeId) -> bool {
        let mut found = false;
        {
            let mut slots = self.slots.lock();
            for slot in slots.iter_mut() {
                if !slot.is_free() && slot.node_id == node_id {
                    slot.state = ReplicaState::ActiveOwner;
                    found = true;
                } else if slot.state == ReplicaState::ActiveOwner {
                    slot.state = ReplicaState::ActiveClone;
                }
            }
        }
        if !found {
            return self.add_mapping(node_id, ReplicaState::ActiveOwner);
        }
        true
    }

    /// Sets `old_owner` to clone and `new_owner` to owner in one critical
    /// section. Touches only slots that already exist.
    fn swap_state(&self, old_owner: NodeId, new_owner: NodeId) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.is_free() {
                continue;
            }
            if slot.node_id == old_owner {
                slot.state = ReplicaState::ActiveClone;
            } else if slot.node_id == new_owner {
                slot.state = ReplicaState::ActiveOwner;
            }
        }
    }

    fn purge_node(&self, node_id: NodeId) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.node_id == node_id {
                slot.clear();
            }
        }
    }

    fn get_by_state(&self, state: ReplicaState) -> Vec<NodeId> {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.node_id)
            .collect()
    }

    fn count_states(&self, states: &HashSet<ReplicaState>) -> usize {
        let slots = self.slots.lock();
        slots.iter().filter(|s| states.contains(&s.state)).count()
    }

    /// Node ids eligible for routed traffic.
    fn replicas(&self) -> Vec<NodeId> {
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|s| s.state.is_routable())
            .map(|s| s.node_id)
            .collect()
    }

    /// Frees every slot that is not owner or clone; returns the node ids
    /// that lost a slot so the caller can clean up their local data.
    fn purge_incomplete(&self) -> Vec<NodeId> {
        let mut slots = self.slots.lock();
        let mut dropped = Vec::new();
        for slot in slots.iter_mut() {
            if slot.state != ReplicaState::ActiveOwner && slot.state != ReplicaState::ActiveClone {
                if !slot.is_free() {
                    dropped.push(slot.node_id);
                }
                slot.clear();
            }
        }
        dropped
    }

    fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            slot.clear();
        }
    }

    pub(crate) fn snapshot(&self) -> [ReplicaSlot; MAP_DEPTH] {
        *self.slots.lock()
    }

    /// Clears every non-free slot whose (node, state) pair is absent from
    /// `visited`; returns true when the local node lost a slot.
    fn retain_visited(
        &self,
        partition: PartitionId,
        visited: &HashSet<(PartitionId, NodeId, ReplicaState)>,
        local_id: NodeId,
    ) -> bool {
        let mut slots = self.slots.lock();
        let mut local_dropped = false;
        for slot in slots.iter_mut() {
            if slot.is_free() {
                continue;
            }
            if !visited.contains(&(partition, slot.node_id, slot.state)) {
                if slot.node_id == local_id {
                    local_dropped = true;
                }
                slot.clear();
            }
        }
        local_dropped
    }
}

/// The partition-to-node map. The container lock guards the partition set;
/// each [`SlotTable`] guards its own slots, so established partitions can
/// be mutated concurrently.
#[derive(Debug, Default)]
pub struct PartitionMap {
    entries: RwLock<HashMap<PartitionId, Arc<SlotTable>>>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, partition: PartitionId) -> Option<Arc<SlotTable>> {
        self.entries.read().get(&partition).cloned()
    }

    fn entry_or_insert(&self, partition: PartitionId) -> Arc<SlotTable> {
        let mut entries = self.entries.write();
        entries
            .entry(partition)
            .or_insert_with(|| Arc::new(SlotTable::new()))
            .clone()
    }

    /// Marks `node_id` as the owner of `partition`, demoting any other owner
    /// to clone. When `node_id` is not yet mapped it is added into the first
    /// free slot. Returns false when the slot table is full and the add was
    /// not possible; the demotion of a prior owner still takes effect.
    pub fn set_owner(&self, partition: PartitionId, node_id: NodeId) -> bool {
        let table = self.entry_or_insert(partition);
        let placed = table.set_owner(node_id);
        if !placed {
            warn!(
                "partition {} has no free replica slot for new owner {}",
                partition, node_id
            );
        }
        placed
    }

    /// Upserts a (node, state) binding: overwrites the state when the node
    /// is already mapped, otherwise takes the first free slot. Creates the
    /// partition entry on demand. False when no free slot remained.
    /// Setting `Free` clears the node's slot instead, so a free slot never
    /// carries a node id.
    pub fn set_state(&self, partition: PartitionId, node_id: NodeId, state: ReplicaState) -> bool {
        if state == ReplicaState::Free {
            if let Some(table) = self.entry(partition) {
                table.purge_node(node_id);
            }
            return true;
        }
        let table = self.entry_or_insert(partition);
        let placed = table.set_state(node_id, state);
        if !placed {
            warn!(
                "partition {} has no free replica slot for node {}",
                partition, node_id
            );
        }
        placed
    }

    /// Clears the slot matching the exact (node, state) pair. No-op when
    /// the partition or pair is unknown.
    pub fn remove_map(&self, partition: PartitionId, node_id: NodeId, state: ReplicaState) {
        if let Some(table) = self.entry(partition) {
            table.remove_mapping(node_id, state);
        }
    }

    /// Demotes `old_owner` to clone and promotes `new_owner` to owner in a
    /// single critical section. Returns false when the partition has no
    /// entry; slots are never created by this call.
    pub fn swap_state(&self, partition: PartitionId, old_owner: NodeId, new_owner: NodeId) -> bool {
        match self.entry(partition) {
            Some(table) => {
                table.swap_state(old_owner, new_owner);
                true
            }
            None => false,
        }
    }

    pub fn is_mapped(&self, partition: PartitionId, node_id: NodeId) -> Option<ReplicaSlot> {
        self.entry(partition).and_then(|t| t.is_mapped(node_id))
    }

    pub fn is_owner(&self, partition: PartitionId, node_id: NodeId) -> bool {
        self.entry(partition).is_some_and(|t| t.is_owner(node_id))
    }

    pub fn get_state(&self, partition: PartitionId, node_id: NodeId) -> ReplicaState {
        self.entry(partition)
            .map(|t| t.get_state(node_id))
            .unwrap_or(ReplicaState::Free)
    }

    /// Partitions where `node_id` holds a routable slot. Used for
    /// self-discovery at startup and by the rebalancer.
    pub fn get_partitions_by_node_id(&self, node_id: NodeId) -> Vec<PartitionId> {
        let entries = self.entries.read();
        let mut result: Vec<PartitionId> = entries
            .iter()
            .filter(|(_, t)| t.is_mapped(node_id).is_some_and(|s| s.state.is_routable()))
            .map(|(p, _)| *p)
            .collect();
        result.sort_unstable();
        result
    }

    /// Refinement of [`get_partitions_by_node_id`]: membership in `states`
    /// instead of the routable threshold.
    pub fn get_partitions_by_node_id_and_states(
        &self,
        node_id: NodeId,
        states: &HashSet<ReplicaState>,
    ) -> Vec<PartitionId> {
        let entries = self.entries.read();
        let mut result: Vec<PartitionId> = entries
            .iter()
            .filter(|(_, t)| {
                t.is_mapped(node_id)
                    .is_some_and(|s| states.contains(&s.state))
            })
            .map(|(p, _)| *p)
            .collect();
        result.sort_unstable();
        result
    }

    /// Distinct node ids holding a slot in `state`, across all partitions.
    pub fn get_node_ids_by_state(&self, state: ReplicaState) -> Vec<NodeId> {
        let entries = self.entries.read();
        let mut matched = BTreeSet::new();
        for table in entries.values() {
            matched.extend(table.get_by_state(state));
        }
        matched.into_iter().collect()
    }

    /// Node ids serving `partition` (state at or above routable). Used to
    /// route inserts.
    pub fn get_nodes_by_partition_id(&self, partition: PartitionId) -> Vec<NodeId> {
        self.entry(partition).map(|t| t.replicas()).unwrap_or_default()
    }

    /// Distinct node ids holding any non-free slot anywhere in the map.
    pub fn mapped_node_ids(&self) -> HashSet<NodeId> {
        let entries = self.entries.read();
        let mut ids = HashSet::new();
        for table in entries.values() {
            for slot in table.snapshot() {
                if !slot.is_free() {
                    ids.insert(slot.node_id);
                }
            }
        }
        ids
    }

    /// True when every partition in `[0, total)` has at least `replication`
    /// slots whose state is in `states`.
    pub fn is_cluster_complete(
        &self,
        total_partitions: u32,
        states: &HashSet<ReplicaState>,
        replication: usize,
    ) -> bool {
        let entries = self.entries.read();
        (0..total_partitions).all(|p| {
            entries
                .get(&p)
                .is_some_and(|t| t.count_states(states) >= replication)
        })
    }

    /// Partitions whose replica count in `states` differs from the requested
    /// replication. Over-replicated partitions are reported as well: both
    /// conditions need a rebalancer's attention.
    pub fn get_missing_partitions(
        &self,
        total_partitions: u32,
        states: &HashSet<ReplicaState>,
        replication: usize,
    ) -> Vec<PartitionId> {
        let entries = self.entries.read();
        (0..total_partitions)
            .filter(|p| {
                entries
                    .get(p)
                    .map(|t| t.count_states(states))
                    .unwrap_or(0)
                    != replication
            })
            .collect()
    }

    /// Frees every slot that is neither owner nor clone. Returns the
    /// partitions where the local node lost a slot, so the caller can drop
    /// the corresponding local data.
    pub fn purge_incomplete(&self, local_id: NodeId) -> Vec<PartitionId> {
        let entries = self.entries.read();
        let mut result = Vec::new();
        for (partition, table) in entries.iter() {
            let dropped = table.purge_incomplete();
            if dropped.contains(&local_id) {
                result.push(*partition);
            }
        }
        result.sort_unstable();
        result
    }

    /// Clears every slot bound to `node_id`, across all partitions.
    pub fn purge_node_by_id(&self, node_id: NodeId) {
        let entries = self.entries.read();
        for table in entries.values() {
            table.purge_node(node_id);
        }
    }

    /// Clears every slot in `state`, across all partitions.
    pub fn purge_by_state(&self, state: ReplicaState) {
        let entries = self.entries.read();
        for table in entries.values() {
            let nodes = table.get_by_state(state);
            for node_id in nodes {
                table.remove_mapping(node_id, state);
            }
        }
    }

    /// Resets every slot to free. Partition entries remain allocated.
    pub fn clear(&self) {
        let entries = self.entries.read();
        for table in entries.values() {
            table.clear();
        }
    }

    /// Copy of the whole map, ordered by partition id. Persistence and the
    /// monitor read through this to keep slot locks short.
    pub(crate) fn snapshot(&self) -> BTreeMap<PartitionId, [ReplicaSlot; MAP_DEPTH]> {
        let entries = self.entries.read();
        entries.iter().map(|(p, t)| (*p, t.snapshot())).collect()
    }

    /// Reconciliation sweep: clears every non-free slot whose
    /// (partition, node, state) triple was not seen in the authoritative
    /// document. Returns the partitions where the local node lost a slot.
    pub(crate) fn retain_visited(
        &self,
        visited: &HashSet<(PartitionId, NodeId, ReplicaState)>,
        local_id: NodeId,
    ) -> Vec<PartitionId> {
        let entries = self.entries.read();
        let mut dropped = Vec::new();
        for (partition, table) in entries.iter() {
            if table.retain_visited(*partition, visited, local_id) {
                dropped.push(*partition);
            }
        }
        dropped.sort_unstable();
        dropped
    }
}
