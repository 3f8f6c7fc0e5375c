//! Net worker (§4.4 startup step 4): periodically heals drift between this
//! node's resident instances and the overlay mesh/DHCP state their
//! networks should have. Restore already does this once at startup; this
//! worker repeats it so a fabric change made outside the control plane
//! (or a dropped `ensure_mesh_and_dhcp` call) gets corrected.

use std::collections::HashSet;
use std::sync::Arc;

use sf_api::{repo, AppState};
use sf_core::config::{keys, timing};
use sf_core::error::Result;
use sf_core::model::{Instance, InstanceState, InterfaceState, Network, NetworkInterface};
use tracing::warn;

pub async fn run(state: Arc<AppState>) {
    loop {
        if let Err(e) = reconcile(&state).await {
            warn!(error = %e, "net: reconciliation pass failed");
        }
        tokio::time::sleep(timing::NET_RECONCILE_TICK).await;
    }
}

async fn reconcile(state: &AppState) -> Result<()> {
    let instances: Vec<Instance> = repo::scan(&state.store, keys::INSTANCES).await?;
    let mine: HashSet<String> = instances
        .into_iter()
        .filter(|i| i.node.as_deref() == Some(state.config.node_name.as_str()) && i.state != InstanceState::Deleted)
        .map(|i| i.uuid)
        .collect();

    let interfaces: Vec<NetworkInterface> = repo::scan(&state.store, keys::INTERFACES).await?;
    let mut seen = HashSet::new();
    for iface in interfaces
        .iter()
        .filter(|i| mine.contains(&i.instance_uuid) && i.state != InterfaceState::Deleted)
    {
        if !seen.insert(iface.network_uuid.clone()) {
            continue;
        }
        if let Some(network) = repo::get::<Network>(&state.store, keys::NETWORKS, &iface.network_uuid).await? {
            state.fabric.ensure_mesh_and_dhcp(&network).await?;
        }
    }

    Ok(())
}
