//! Node registration and lease refresh (§4.4 startup step 1).
//!
//! A node's liveness is its own `Node.lastseen`: the scheduler's candidate
//! gathering in sf-api already treats a node as dead once `lastseen` is
//! older than [`timing::NODE_HEARTBEAT_LEASE`], so keeping that field fresh
//! on a tick below a third of the lease is the entire heartbeat contract.

use chrono::Utc;
use sf_api::{repo, AppState};
use sf_core::config::keys;
use sf_core::error::Result;
use sf_core::model::Node;
use tracing::{info, warn};

pub async fn register(state: &AppState) -> Result<()> {
    let node = match repo::get::<Node>(&state.store, keys::NODES, &state.config.node_name).await? {
        Some(mut existing) => {
            existing.ip = state.config.node_ip.clone();
            existing.lastseen = Utc::now();
            existing
        }
        None => Node {
            name: state.config.node_name.clone(),
            ip: state.config.node_ip.clone(),
            fqdn: state.config.node_name.clone(),
            lastseen: Utc::now(),
            free_cpu: 0,
            free_ram_mb: 0,
            free_disk_gb: 0,
        },
    };
    repo::put(&state.store, keys::NODES, &state.config.node_name, &node).await?;
    info!(node = %state.config.node_name, ip = %state.config.node_ip, "registered node");
    Ok(())
}

pub async fn refresh(state: &AppState) {
    match repo::get::<Node>(&state.store, keys::NODES, &state.config.node_name).await {
        Ok(Some(mut node)) => {
            node.lastseen = Utc::now();
            if let Err(e) = repo::put(&state.store, keys::NODES, &state.config.node_name, &node).await {
                warn!(error = %e, "heartbeat: failed to refresh node lease");
            }
        }
        Ok(None) => warn!("heartbeat: node record missing, re-registering"),
        Err(e) => warn!(error = %e, "heartbeat: failed to read node record"),
    }
}
