use latticedb::config::Config;
use latticedb::core::cluster::{
    ClusterContext, Connector, Mapper, NodeConnection, ReplicaState,
};
use latticedb::core::errors::LatticeDBError;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

struct NullConnector;

#[async_trait]
impl Connector for NullConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
    ) -> Result<Box<dyn NodeConnection>, LatticeDBError> {
        Err(LatticeDBError::Transport("no transport in tests".into()))
    }
}

fn mapper_in(dir: &TempDir, test_mode: bool) -> Arc<Mapper> {
    let config = Config {
        data_dir: dir.path().to_str().unwrap().to_string(),
        test_mode,
        ..Config::default()
    };
    let context = Arc::new(ClusterContext::from_config(&config));
    Arc::new(Mapper::new(context, Arc::new(NullConnector)))
}

#[test]
fn test_partition_map_round_trip_keeps_active_projection() {
    let dir = TempDir::new().unwrap();

    let writer = mapper_in(&dir, false);
    let map = writer.partition_map();
    map.set_state(0, 100, ReplicaState::ActiveOwner);
    map.set_state(0, 200, ReplicaState::ActiveClone);
    map.set_state(1, 300, ReplicaState::ActivePlaceholder);
    // Neither of these states has a durable form.
    map.set_state(2, 400, ReplicaState::Failed);
    map.set_state(2, 500, ReplicaState::Routable);
    writer.save_partitions().unwrap();

    let reader = mapper_in(&dir, false);
    reader.load_partitions().unwrap();
    let loaded = reader.partition_map();
    assert_eq!(loaded.get_state(0, 100), ReplicaState::ActiveOwner);
    assert_eq!(loaded.get_state(0, 200), ReplicaState::ActiveClone);
    assert_eq!(loaded.get_state(1, 300), ReplicaState::ActivePlaceholder);
    assert_eq!(loaded.get_state(2, 400), ReplicaState::Free);
    assert_eq!(loaded.get_state(2, 500), ReplicaState::Free);
}

#[test]
fn test_persisted_state_literals() {
    let dir = TempDir::new().unwrap();

    let writer = mapper_in(&dir, false);
    writer
        .partition_map()
        .set_state(7, 100, ReplicaState::ActivePlaceholder);
    writer.save_partitions().unwrap();

    let content = std::fs::read_to_string(dir.path().join("partitions.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(doc["7"]["nodes"][0]["node_id"], 100);
    // The placeholder state is written as the build literal.
    assert_eq!(doc["7"]["nodes"][0]["state"], "active_build");
}

#[test]
fn test_unknown_state_literal_is_ignored_on_load() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("partitions.json"),
        r#"{ "3": { "nodes": [
            { "node_id": 5, "state": "active_sideways" },
            { "node_id": 6, "state": "active_clone" }
        ]}}"#,
    )
    .unwrap();

    let reader = mapper_in(&dir, false);
    reader.load_partitions().unwrap();
    assert_eq!(reader.partition_map().get_state(3, 5), ReplicaState::Free);
    assert_eq!(
        reader.partition_map().get_state(3, 6),
        ReplicaState::ActiveClone
    );
}

#[test]
fn test_load_partitions_seeds_missing_file() {
    let dir = TempDir::new().unwrap();
    let mapper = mapper_in(&dir, false);
    mapper.load_partitions().unwrap();

    let content = std::fs::read_to_string(dir.path().join("partitions.json")).unwrap();
    assert_eq!(content, "{}");
}

#[test]
fn test_load_partitions_clears_previous_state() {
    let dir = TempDir::new().unwrap();
    let mapper = mapper_in(&dir, false);
    mapper
        .partition_map()
        .set_state(0, 1, ReplicaState::ActiveOwner);
    mapper.load_partitions().unwrap();
    assert_eq!(mapper.partition_map().get_state(0, 1), ReplicaState::Free);
}

#[test]
fn test_routes_round_trip() {
    let dir = TempDir::new().unwrap();

    let writer = mapper_in(&dir, false);
    writer.add_route("alpha", 100, "10.0.0.1", 9000);
    writer.add_route("beta", 200, "10.0.0.2", 9001);
    writer.save_routes().unwrap();

    let reader = mapper_in(&dir, false);
    reader.load_routes().unwrap();
    assert_eq!(reader.registry().count_routes(), 2);
    let alpha = reader.registry().get_route(100).unwrap();
    assert_eq!(alpha.name, "alpha");
    assert_eq!(alpha.host, "10.0.0.1");
    assert_eq!(alpha.port, 9000);
    assert_eq!(reader.registry().get_route_id("beta"), Some(200));
}

#[test]
fn test_load_routes_skips_malformed_entries() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("routes.json"),
        r#"[
            { "name": "good", "id": 100, "host": "10.0.0.1", "port": 9000 },
            { "name": "no-host", "id": 200, "host": "", "port": 9000 },
            { "name": "no-port", "id": 300, "host": "10.0.0.3", "port": 0 }
        ]"#,
    )
    .unwrap();

    let reader = mapper_in(&dir, false);
    reader.load_routes().unwrap();
    assert_eq!(reader.registry().count_routes(), 1);
    assert!(reader.registry().has_route(100));
}

#[test]
fn test_corrupt_partition_document_is_an_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("partitions.json"), "not json").unwrap();

    let reader = mapper_in(&dir, false);
    assert!(matches!(
        reader.load_partitions(),
        Err(LatticeDBError::BadDocument(_))
    ));
}

#[test]
fn test_test_mode_suppresses_persistence() {
    let dir = TempDir::new().unwrap();
    let mapper = mapper_in(&dir, true);
    mapper
        .partition_map()
        .set_state(0, 100, ReplicaState::ActiveOwner);
    mapper.add_route("alpha", 100, "10.0.0.1", 9000);

    mapper.save_partitions().unwrap();
    mapper.save_routes().unwrap();
    mapper.load_partitions().unwrap();
    mapper.load_routes().unwrap();

    assert!(!dir.path().join("partitions.json").exists());
    assert!(!dir.path().join("routes.json").exists());
}
