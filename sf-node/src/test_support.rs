//! Shared fixture for the worker unit tests below: a real `AppState` backed
//! by an in-memory single-node store (the same `StorageBackend::Memory` dev
//! mode `main.rs` selects when `COORD_DEV=1`), so each worker's logic runs
//! against the genuine `CoordinationStore` contract instead of a hand-rolled
//! fake.

use std::collections::BTreeMap;
use std::sync::Arc;

use mraft::StorageBackend;
use sf_api::AppState;
use sf_core::config::CoordConfig;
use sf_core::{Config, Scheduler};
use sf_coord::{CoordinationStore, RaftCoordStore};
use sf_hypervisor::{HypervisorDriver, LoggingHypervisor, LoggingNetworkFabric};
use sf_images::{ImageCache, ResolverRegistry};

pub async fn test_state(node_name: &str, storage_path: &str) -> Arc<AppState> {
    test_state_with_hypervisor(node_name, storage_path, LoggingHypervisor::new()).await
}

pub async fn test_state_with_hypervisor(
    node_name: &str,
    storage_path: &str,
    hypervisor: Arc<dyn HypervisorDriver>,
) -> Arc<AppState> {
    let store: Arc<dyn CoordinationStore> =
        RaftCoordStore::bootstrap(1, "127.0.0.1:0".into(), BTreeMap::new(), StorageBackend::Memory)
            .await
            .expect("bootstrap in-memory store");

    let config = Config {
        node_name: node_name.to_string(),
        node_ip: "10.0.0.1".to_string(),
        network_node_ip: "10.0.0.1".to_string(),
        node_egress_nic: "eth0".to_string(),
        api_port: 13000,
        floating_network: "10.255.0.0/24".to_string(),
        auth_secret_seed: "test-seed".to_string(),
        storage_path: storage_path.to_string(),
        include_tracebacks: false,
        overcommit_cpu_ratio: 16.0,
        overcommit_ram_ratio: 1.5,
        coord: CoordConfig {
            node_id: 1,
            listen_addr: "127.0.0.1:0".to_string(),
            peers: BTreeMap::new(),
            dev: true,
        },
    };

    let images = Arc::new(ImageCache::new(
        config.storage_path.clone(),
        config.node_name.clone(),
        store.clone(),
        ResolverRegistry::new(),
    ));

    Arc::new(AppState {
        config,
        store,
        images,
        hypervisor,
        fabric: Arc::new(LoggingNetworkFabric),
        scheduler: Scheduler::new(16.0, 1.5),
        http: reqwest::Client::new(),
    })
}
