//! Network bookkeeping shared across handlers: locating the reserved
//! `floating` network and allocating cluster-unique vxlan ids (§8 "duplicate
//! vxlan_id must be impossible").

use std::time::Duration;

use sf_core::config::keys;
use sf_core::error::{Error, Result};
use sf_core::model::{Network, FLOATING_NETWORK_NAME};
use sf_coord::acquire_lock;

use crate::repo;
use crate::state::AppState;

const VXLAN_LOCK: &str = "sf/networks/vxlan";
const VXLAN_LOCK_TTL: Duration = Duration::from_secs(30);

pub async fn find_network_by_name(state: &AppState, name: &str) -> Result<Option<Network>> {
    let networks: Vec<Network> = repo::scan(&state.store, keys::NETWORKS).await?;
    Ok(networks.into_iter().find(|n| n.name == name))
}

pub async fn find_floating_network(state: &AppState) -> Result<Network> {
    find_network_by_name(state, FLOATING_NETWORK_NAME)
        .await?
        .ok_or_else(|| Error::Internal("floating network not bootstrapped on this cluster".into()))
}

/// Draw the next unused vxlan id and persist `network` under it, all while
/// holding a cluster-wide lock so two concurrent creates can never collide.
pub async fn allocate_vxlan_id_and_persist(state: &AppState, mut network: Network) -> Result<Network> {
    let lock = acquire_lock(state.store.clone(), VXLAN_LOCK, VXLAN_LOCK_TTL).await?;

    let result = async {
        let existing: Vec<Network> = repo::scan(&state.store, keys::NETWORKS).await?;
        let next = existing.iter().map(|n| n.vxlan_id).max().map(|m| m + 1).unwrap_or(1);
        network.vxlan_id = next;
        repo::put(&state.store, keys::NETWORKS, &network.uuid, &network).await?;
        Ok(network)
    }
    .await;

    lock.release().await;
    result
}
