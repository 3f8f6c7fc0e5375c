//! Resource usage publisher (§4.4 startup step 2): forked before every
//! other worker because placement decisions made the instant the API
//! worker starts depend on its output being fresh.

use std::sync::Arc;

use sf_api::{repo, AppState};
use sf_core::config::{keys, timing};
use sf_core::error::{Error, Result};
use sf_core::model::Node;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::warn;

pub async fn run(state: Arc<AppState>) {
    let mut sys = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );

    loop {
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let free_cpu = sys.cpus().len() as u32;
        let free_ram_mb = sys.available_memory() / (1024 * 1024);
        let free_disk_gb = free_disk_gb(&state.config.storage_path);

        if let Err(e) = publish(&state, free_cpu, free_ram_mb, free_disk_gb).await {
            warn!(error = %e, "resources: failed to publish node capacity");
        }

        tokio::time::sleep(timing::RESOURCES_PUBLISH_TICK).await;
    }
}

/// Available space on whichever mounted disk owns `storage_path`, found by
/// the longest matching mount point prefix.
fn free_disk_gb(storage_path: &str) -> u64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| storage_path.starts_with(&*d.mount_point().to_string_lossy()))
        .max_by_key(|d| d.mount_point().to_string_lossy().len())
        .map(|d| d.available_space() / (1u64 << 30))
        .unwrap_or(0)
}

async fn publish(state: &AppState, free_cpu: u32, free_ram_mb: u64, free_disk_gb: u64) -> Result<()> {
    let mut node: Node = repo::get(&state.store, keys::NODES, &state.config.node_name)
        .await?
        .ok_or_else(|| Error::Internal("node record missing before resource publish".into()))?;
    node.free_cpu = free_cpu;
    node.free_ram_mb = free_ram_mb;
    node.free_disk_gb = free_disk_gb;
    node.lastseen = chrono::Utc::now();
    repo::put(&state.store, keys::NODES, &state.config.node_name, &node).await
}
