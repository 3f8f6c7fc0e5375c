//! Network-node-only startup (§4.4 startup step 3). Runs once, before the
//! remaining workers fork, on whichever node has `NODE_IP == NETWORK_NODE_IP`.

use sf_api::netops;
use sf_api::AppState;
use sf_core::error::Result;
use sf_core::model::{new_uuid, Network, NetworkState, FLOATING_NETWORK_NAME};
use tracing::info;

pub async fn bootstrap_network_node(state: &AppState) -> Result<()> {
    let floating = match netops::find_network_by_name(state, FLOATING_NETWORK_NAME).await? {
        Some(network) => network,
        None => {
            let network = Network {
                uuid: new_uuid(),
                vxlan_id: 0,
                netblock: state.config.floating_network.clone(),
                provide_dhcp: false,
                provide_nat: true,
                owner: sf_api::auth::ADMIN_NAMESPACE.to_string(),
                name: FLOATING_NETWORK_NAME.to_string(),
                state: NetworkState::Created,
                floating_gateway: None,
                deleted_at: None,
            };
            let network = netops::allocate_vxlan_id_and_persist(state, network).await?;
            info!(network = %network.uuid, "bootstrapped floating network");
            network
        }
    };

    state.fabric.bootstrap_network_node(&floating, &state.config.node_egress_nic).await
}
