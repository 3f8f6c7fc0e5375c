//! The node supervisor binary (§4.4): the only executable this workspace
//! ships. It owns the tokio runtime, bootstraps the coordination store and
//! every collaborator behind [`sf_api::AppState`], then hands off to
//! [`supervisor::run`] for the startup sequence and fork/monitor loop.

mod bootstrap;
mod cleaner;
mod heartbeat;
mod net_worker;
mod queues;
mod resources;
mod restore;
mod supervisor;
mod triggers;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use mraft::StorageBackend;
use sf_core::{Config, Scheduler};
use sf_coord::{CoordinationStore, RaftCoordStore};
use sf_hypervisor::{LoggingHypervisor, LoggingNetworkFabric};
use sf_images::{ImageCache, ResolverRegistry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sf_node=info".parse()?))
        .init();

    let config = Config::from_env()?;

    let storage = if config.coord.dev {
        StorageBackend::Memory
    } else {
        StorageBackend::Persistent {
            path: PathBuf::from(&config.storage_path).join("raft.db"),
        }
    };

    let store: Arc<dyn CoordinationStore> = RaftCoordStore::bootstrap(
        config.coord.node_id,
        config.coord.listen_addr.clone(),
        config.coord.peers.clone(),
        storage,
    )
    .await?;

    let images = Arc::new(ImageCache::new(
        config.storage_path.clone(),
        config.node_name.clone(),
        store.clone(),
        ResolverRegistry::new(),
    ));

    let scheduler = Scheduler::new(config.overcommit_cpu_ratio, config.overcommit_ram_ratio);

    let state = Arc::new(sf_api::AppState {
        config,
        store,
        images,
        hypervisor: LoggingHypervisor::new(),
        fabric: Arc::new(LoggingNetworkFabric),
        scheduler,
        http: reqwest::Client::new(),
    });

    supervisor::run(state).await
}
