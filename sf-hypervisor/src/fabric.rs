//! The overlay mesh / DHCP boundary (§1 external collaborators: "DHCP/bridge
//! configuration tools"). The net worker's real implementation shells out to
//! `ip`, `iptables` and a DHCP daemon; this crate only defines what the
//! instance creation pipeline and the net worker both need to call.

use async_trait::async_trait;
use sf_core::error::Result;
use sf_core::model::Network;
use tracing::info;

#[async_trait]
pub trait NetworkFabric: Send + Sync {
    /// Ensure the overlay mesh and, if `provide_dhcp`, a DHCP responder
    /// exist for `network` on this node. Idempotent (§4.5 step 7).
    async fn ensure_mesh_and_dhcp(&self, network: &Network) -> Result<()>;

    async fn remove_dhcp(&self, network: &Network) -> Result<()>;

    /// One-time network-node setup (§4.4 startup step 3): a physical bridge
    /// for `egress_nic`, forwarding and masquerade rules for `floating`.
    /// Idempotent - the bridge's mere existence means this already ran.
    /// Never touches `egress_nic` itself, only the bridge built alongside it
    /// - enslaving the physical NIC would sever the node from the network.
    async fn bootstrap_network_node(&self, floating: &Network, egress_nic: &str) -> Result<()>;
}

#[derive(Default)]
pub struct LoggingNetworkFabric;

#[async_trait]
impl NetworkFabric for LoggingNetworkFabric {
    async fn ensure_mesh_and_dhcp(&self, network: &Network) -> Result<()> {
        info!(network = %network.uuid, vxlan_id = network.vxlan_id, dhcp = network.provide_dhcp, "would ensure overlay mesh and dhcp");
        Ok(())
    }

    async fn remove_dhcp(&self, network: &Network) -> Result<()> {
        info!(network = %network.uuid, "would remove dhcp");
        Ok(())
    }

    async fn bootstrap_network_node(&self, floating: &Network, egress_nic: &str) -> Result<()> {
        info!(network = %floating.uuid, egress_nic, "would create physical bridge and NAT rules");
        Ok(())
    }
}
