use latticedb::core::cluster::{MAP_DEPTH, PartitionMap, ReplicaState};

#[test]
fn test_set_state_creates_entry_and_upserts() {
    let map = PartitionMap::new();
    assert!(map.set_state(3, 100, ReplicaState::ActiveClone));
    assert_eq!(map.get_state(3, 100), ReplicaState::ActiveClone);

    // Upsert overwrites in place rather than taking a second slot.
    assert!(map.set_state(3, 100, ReplicaState::ActiveOwner));
    assert_eq!(map.get_state(3, 100), ReplicaState::ActiveOwner);
    assert_eq!(map.get_nodes_by_partition_id(3), vec![100]);
}

#[test]
fn test_set_state_is_idempotent() {
    let map = PartitionMap::new();
    map.set_state(0, 7, ReplicaState::ActiveClone);
    map.set_state(0, 7, ReplicaState::ActiveClone);
    assert_eq!(map.get_nodes_by_partition_id(0), vec![7]);
    assert_eq!(map.get_state(0, 7), ReplicaState::ActiveClone);
}

#[test]
fn test_set_state_free_clears_the_slot() {
    let map = PartitionMap::new();
    map.set_state(1, 5, ReplicaState::ActiveOwner);
    map.set_state(1, 5, ReplicaState::Free);
    assert!(map.is_mapped(1, 5).is_none());
    assert!(map.get_nodes_by_partition_id(1).is_empty());
}

#[test]
fn test_set_owner_adds_when_unmapped() {
    let map = PartitionMap::new();
    assert!(map.set_owner(2, 42));
    assert!(map.is_owner(2, 42));
}

#[test]
fn test_set_owner_promotes_and_demotes() {
    let map = PartitionMap::new();
    map.set_state(5, 100, ReplicaState::ActiveOwner);
    map.set_state(5, 200, ReplicaState::ActiveClone);

    // Promoting a mapped clone demotes the previous owner.
    assert!(map.set_owner(5, 200));
    assert!(map.is_owner(5, 200));
    assert_eq!(map.get_state(5, 100), ReplicaState::ActiveClone);

    // Promoting an unmapped node also demotes the previous owner.
    assert!(map.set_owner(5, 300));
    assert!(map.is_owner(5, 300));
    assert_eq!(map.get_state(5, 200), ReplicaState::ActiveClone);
    assert_eq!(map.get_state(5, 100), ReplicaState::ActiveClone);
}

#[test]
fn test_set_owner_with_full_slot_table() {
    let map = PartitionMap::new();
    map.set_state(9, 1, ReplicaState::ActiveOwner);
    for node in 2..=MAP_DEPTH as i64 {
        map.set_state(9, node, ReplicaState::ActiveClone);
    }
    assert_eq!(map.get_nodes_by_partition_id(9).len(), MAP_DEPTH);

    // All slots taken: the previous owner is still demoted but the new
    // node cannot be placed.
    assert!(!map.set_owner(9, 99));
    assert!(map.is_mapped(9, 99).is_none());
    assert_eq!(map.get_state(9, 1), ReplicaState::ActiveClone);
    assert!(!map.is_owner(9, 1));
}

#[test]
fn test_swap_state_moves_ownership() {
    let map = PartitionMap::new();
    map.set_state(5, 100, ReplicaState::ActiveOwner);
    map.set_state(5, 200, ReplicaState::ActiveClone);

    assert!(map.swap_state(5, 100, 200));
    assert_eq!(map.get_state(5, 100), ReplicaState::ActiveClone);
    assert_eq!(map.get_state(5, 200), ReplicaState::ActiveOwner);

    // Still exactly one owner.
    let owners: Vec<i64> = [100, 200]
        .into_iter()
        .filter(|n| map.is_owner(5, *n))
        .collect();
    assert_eq!(owners, vec![200]);
}

#[test]
fn test_swap_state_unknown_partition() {
    let map = PartitionMap::new();
    assert!(!map.swap_state(77, 1, 2));
}

#[test]
fn test_remove_map_requires_exact_pair() {
    let map = PartitionMap::new();
    map.set_state(4, 10, ReplicaState::ActiveClone);

    // Wrong state: no-op.
    map.remove_map(4, 10, ReplicaState::ActiveOwner);
    assert_eq!(map.get_state(4, 10), ReplicaState::ActiveClone);

    map.remove_map(4, 10, ReplicaState::ActiveClone);
    assert!(map.is_mapped(4, 10).is_none());
}

#[test]
fn test_routable_threshold() {
    let map = PartitionMap::new();
    map.set_state(0, 1, ReplicaState::ActiveOwner);
    map.set_state(0, 2, ReplicaState::ActivePlaceholder);
    map.set_state(0, 3, ReplicaState::Failed);

    // Placeholders are routable, failed slots are not.
    assert_eq!(map.get_nodes_by_partition_id(0), vec![1, 2]);
    assert_eq!(map.get_partitions_by_node_id(2), vec![0]);
    assert!(map.get_partitions_by_node_id(3).is_empty());
}

#[test]
fn test_get_partitions_by_node_id_and_states() {
    let map = PartitionMap::new();
    map.set_state(0, 9, ReplicaState::ActiveOwner);
    map.set_state(1, 9, ReplicaState::ActiveClone);
    map.set_state(2, 9, ReplicaState::ActivePlaceholder);

    let states = [ReplicaState::ActiveOwner, ReplicaState::ActiveClone]
        .into_iter()
        .collect();
    assert_eq!(map.get_partitions_by_node_id_and_states(9, &states), vec![0, 1]);
}

#[test]
fn test_get_node_ids_by_state_deduplicates() {
    let map = PartitionMap::new();
    map.set_state(0, 5, ReplicaState::ActiveClone);
    map.set_state(1, 5, ReplicaState::ActiveClone);
    map.set_state(1, 6, ReplicaState::ActiveClone);
    map.set_state(2, 6, ReplicaState::ActiveOwner);

    assert_eq!(map.get_node_ids_by_state(ReplicaState::ActiveClone), vec![5, 6]);
    assert_eq!(map.get_node_ids_by_state(ReplicaState::ActiveOwner), vec![6]);
}

#[test]
fn test_purge_node_by_id() {
    let map = PartitionMap::new();
    map.set_state(0, 5, ReplicaState::ActiveOwner);
    map.set_state(1, 5, ReplicaState::ActiveClone);
    map.set_state(1, 6, ReplicaState::ActiveClone);

    map.purge_node_by_id(5);
    assert!(map.is_mapped(0, 5).is_none());
    assert!(map.is_mapped(1, 5).is_none());
    assert_eq!(map.get_nodes_by_partition_id(1), vec![6]);
}

#[test]
fn test_purge_by_state() {
    let map = PartitionMap::new();
    map.set_state(0, 1, ReplicaState::ActivePlaceholder);
    map.set_state(1, 2, ReplicaState::ActivePlaceholder);
    map.set_state(1, 3, ReplicaState::ActiveOwner);

    map.purge_by_state(ReplicaState::ActivePlaceholder);
    assert!(map.is_mapped(0, 1).is_none());
    assert!(map.is_mapped(1, 2).is_none());
    assert_eq!(map.get_state(1, 3), ReplicaState::ActiveOwner);
}

#[test]
fn test_purge_incomplete_reports_local_losses() {
    let local = 1000;
    let map = PartitionMap::new();
    map.set_state(9, local, ReplicaState::ActivePlaceholder);
    map.set_state(9, 2000, ReplicaState::ActiveOwner);

    let lost = map.purge_incomplete(local);
    assert_eq!(lost, vec![9]);
    assert!(map.is_mapped(9, local).is_none());
    assert_eq!(map.get_state(9, 2000), ReplicaState::ActiveOwner);
}

#[test]
fn test_purge_incomplete_ignores_remote_losses() {
    let map = PartitionMap::new();
    map.set_state(3, 2000, ReplicaState::ActivePlaceholder);
    map.set_state(3, 3000, ReplicaState::ActiveClone);

    let lost = map.purge_incomplete(1000);
    assert!(lost.is_empty());
    assert!(map.is_mapped(3, 2000).is_none());
    assert_eq!(map.get_state(3, 3000), ReplicaState::ActiveClone);
}

#[test]
fn test_clear_resets_all_slots() {
    let map = PartitionMap::new();
    map.set_state(0, 1, ReplicaState::ActiveOwner);
    map.set_state(1, 2, ReplicaState::ActiveClone);

    map.clear();
    assert!(map.get_nodes_by_partition_id(0).is_empty());
    assert!(map.get_nodes_by_partition_id(1).is_empty());
    assert_eq!(map.get_state(0, 1), ReplicaState::Free);
}
