//! The instance creation pipeline (§4.5) - the aggregating flow that ties
//! together placement, IP allocation, the image cache, and the hypervisor
//! driver. Every other handler is comparatively a thin wrapper over the
//! coordination store; this one earns its own module.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use axum::http::{HeaderMap, Method};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sf_core::config::keys;
use sf_core::config::timing;
use sf_core::error::{Error, Result};
use sf_core::model::{
    generate_mac_from_id, new_uuid, DiskSpec, Instance, InstanceState, InterfaceState, IpManager,
    Network, NetworkInterface, Node, PowerState,
};
use sf_core::scheduler::{NodeCandidate, PlacementRequest};
use sf_coord::acquire_lock;
use sf_hypervisor::{DiskAttachment, DomainSpec, InterfaceAttachment};
use sf_images::DiskDerivation;

use crate::events::append_event;
use crate::proxy;
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct NetworkRequest {
    pub network_uuid: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct DiskRequest {
    pub size_gb: u64,
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub cpus: u32,
    pub memory: u64,
    #[serde(default)]
    pub network: Vec<NetworkRequest>,
    #[serde(default)]
    pub disk: Vec<DiskRequest>,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub placed_on: Option<String>,
    #[serde(default)]
    pub instance_uuid: Option<String>,
}

pub enum Outcome {
    Created(Box<Instance>),
    Proxied(Response),
}

fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub async fn create_instance(
    state: &AppState,
    headers: &HeaderMap,
    req: CreateInstanceRequest,
) -> Result<Outcome> {
    let name = sanitize_name(&req.name);
    let instance_uuid = req.instance_uuid.clone().unwrap_or_else(new_uuid);

    append_event(
        state,
        "instance",
        &instance_uuid,
        "api",
        "uuid-allocated",
        "uuid allocated",
    )
    .await?;

    let creation_lock = acquire_lock(
        state.store.clone(),
        &keys::instance_lock(&instance_uuid),
        std::time::Duration::from_secs(60),
    )
    .await?;

    let mut instance: Instance = repo::get(&state.store, keys::INSTANCES, &instance_uuid)
        .await?
        .unwrap_or_else(|| {
            let disks: Vec<DiskSpec> = req
                .disk
                .iter()
                .map(|d| DiskSpec {
                    size_gb: d.size_gb,
                    base: d.base.clone(),
                })
                .collect();
            let mut inst = Instance::new(instance_uuid.clone(), name.clone(), req.cpus, req.memory, disks);
            inst.ssh_key = req.ssh_key.clone();
            inst.user_data = req.user_data.clone();
            inst
        });

    if instance.node.is_none() {
        if let Err(e) = place_instance(state, &mut instance, &req).await {
            instance.state = InstanceState::Error;
            repo::put(&state.store, keys::INSTANCES, &instance_uuid, &instance).await?;
            creation_lock.release().await;
            return Err(e);
        }
        repo::put(&state.store, keys::INSTANCES, &instance_uuid, &instance).await?;
    }

    let placed_on = instance.node.clone().expect("placement always sets node before this point");

    if placed_on != state.config.node_name {
        creation_lock.release().await;
        let node_record: Option<Node> = repo::get(&state.store, keys::NODES, &placed_on).await?;
        let node_record = node_record.ok_or_else(|| Error::NotFound(format!("node {placed_on}")))?;

        let mut body = serde_json::to_value(&req).map_err(|e| Error::Internal(e.to_string()))?;
        body["placed_on"] = json!(placed_on);
        body["instance_uuid"] = json!(instance_uuid);
        let bytes = serde_json::to_vec(&body).map_err(|e| Error::Internal(e.to_string()))?;

        let target = state.node_url(&node_record.ip, "/api/v1/instances");
        let response = proxy::forward(&state.http, &target, Method::POST, headers, bytes).await?;
        return Ok(Outcome::Proxied(response));
    }

    match provision_locally(state, &instance_uuid, &req, &mut instance).await {
        Ok(()) => {
            creation_lock.release().await;
            Ok(Outcome::Created(Box::new(instance)))
        }
        Err(e) => {
            creation_lock.release().await;
            Err(e)
        }
    }
}

async fn place_instance(state: &AppState, instance: &mut Instance, req: &CreateInstanceRequest) -> Result<()> {
    let candidates = gather_candidates(state).await?;
    let requested_networks: Vec<String> = req.network.iter().map(|n| n.network_uuid.clone()).collect();
    let placement_req = PlacementRequest {
        vcpus: instance.vcpus,
        memory_mb: instance.memory_mb,
        disk_gb: instance.total_disk_gb(),
        requested_networks: &requested_networks,
    };

    let restrict_to = req.placed_on.clone().map(|n| vec![n]);
    let ranked = state
        .scheduler
        .place(&candidates, &placement_req, restrict_to.as_deref())?;

    let chosen = ranked.into_iter().next().ok_or(Error::InsufficientCapacity)?;
    instance.node = Some(chosen);
    Ok(())
}

async fn gather_candidates(state: &AppState) -> Result<Vec<NodeCandidate>> {
    let nodes: Vec<Node> = repo::scan(&state.store, keys::NODES).await?;
    let now = Utc::now();
    let lease = chrono::Duration::from_std(timing::NODE_HEARTBEAT_LEASE).expect("constant duration fits");

    let live: Vec<Node> = nodes
        .into_iter()
        .filter(|n| now.signed_duration_since(n.lastseen) < lease)
        .collect();

    let interfaces: Vec<NetworkInterface> = repo::scan(&state.store, keys::INTERFACES).await?;
    let instances: Vec<Instance> = repo::scan(&state.store, keys::INSTANCES).await?;
    let instance_node: HashMap<String, String> = instances
        .into_iter()
        .filter_map(|i| i.node.map(|n| (i.uuid, n)))
        .collect();

    let mut resident: HashMap<String, HashSet<String>> = HashMap::new();
    for iface in interfaces.into_iter().filter(|i| i.state != InterfaceState::Deleted) {
        if let Some(node_name) = instance_node.get(&iface.instance_uuid) {
            resident.entry(node_name.clone()).or_default().insert(iface.network_uuid);
        }
    }

    Ok(live
        .into_iter()
        .map(|node| {
            let resident_networks = resident.get(&node.name).cloned().unwrap_or_default().into_iter().collect();
            NodeCandidate { node, resident_networks }
        })
        .collect())
}

async fn provision_locally(
    state: &AppState,
    instance_uuid: &str,
    req: &CreateInstanceRequest,
    instance: &mut Instance,
) -> Result<()> {
    let mut allocated: Vec<(String, String)> = Vec::new();
    let mut interfaces: Vec<NetworkInterface> = Vec::new();

    let provisioning = async {
        for (order, net_req) in req.network.iter().enumerate() {
            let addr = allocate_network_address(state, &net_req.network_uuid, net_req.address.as_deref()).await?;
            allocated.push((net_req.network_uuid.clone(), addr.clone()));

            let iface_uuid = new_uuid();
            let iface = NetworkInterface {
                uuid: iface_uuid.clone(),
                instance_uuid: instance_uuid.to_string(),
                network_uuid: net_req.network_uuid.clone(),
                ipv4: addr,
                macaddr: generate_mac_from_id(&iface_uuid),
                model: net_req.model.clone().unwrap_or_else(|| "virtio".to_string()),
                order: order as u32,
                floating: None,
                state: InterfaceState::Initial,
            };
            repo::put(&state.store, keys::INTERFACES, &iface_uuid, &iface).await?;
            interfaces.push(iface);
        }

        let mut seen_networks = HashSet::new();
        for net_req in &req.network {
            if seen_networks.insert(net_req.network_uuid.clone()) {
                if let Some(network) = repo::get::<Network>(&state.store, keys::NETWORKS, &net_req.network_uuid).await? {
                    state.fabric.ensure_mesh_and_dhcp(&network).await?;
                }
            }
        }

        let disks = build_disks(state, instance_uuid, &req.disk).await?;
        let domain_interfaces: Vec<InterfaceAttachment> = interfaces
            .iter()
            .map(|iface| InterfaceAttachment {
                mac_address: iface.macaddr.clone(),
                model: iface.model.clone(),
                bridge: format!("br-{}", iface.network_uuid),
            })
            .collect();

        state
            .hypervisor
            .ensure_running(&DomainSpec {
                instance_uuid: instance_uuid.to_string(),
                name: instance.name.clone(),
                vcpus: instance.vcpus,
                memory_mb: instance.memory_mb,
                disks,
                interfaces: domain_interfaces,
            })
            .await?;

        Ok(())
    }
    .await;

    if let Err(e) = provisioning {
        rollback_ip_allocations(state, &allocated).await;
        return Err(e);
    }

    for iface in &mut interfaces {
        iface.state = InterfaceState::Created;
        repo::put(&state.store, keys::INTERFACES, &iface.uuid, iface).await?;
    }

    instance.state = InstanceState::Created;
    instance.power_state = PowerState::On;
    repo::put(&state.store, keys::INSTANCES, instance_uuid, instance).await?;

    Ok(())
}

/// Load-mutate-writeback an IPManager under its named lock (§4.5 step 6,
/// §9 "IPManager serialization"). Shared by interface provisioning here and
/// by the floating-IP handlers, which address the `floating` network the
/// same way.
pub async fn allocate_network_address(state: &AppState, network_uuid: &str, requested: Option<&str>) -> Result<String> {
    let lock_name = keys::ipmanager_lock(network_uuid);
    let lock = acquire_lock(state.store.clone(), &lock_name, timing::IPMANAGER_LOCK_TTL).await?;

    let result = async {
        let network: Option<Network> = repo::get(&state.store, keys::NETWORKS, network_uuid).await?;
        let network = network.ok_or_else(|| Error::NotFound(format!("network {network_uuid}")))?;

        let mut ipmanager: IpManager = repo::get(&state.store, keys::IPMANAGERS, network_uuid)
            .await?
            .unwrap_or_else(|| IpManager::new(network_uuid.to_string(), network.netblock.clone()));

        let addr = match requested {
            Some(addr) => {
                ipmanager.reserve(addr)?;
                addr.to_string()
            }
            None => ipmanager.allocate_random()?,
        };

        repo::put(&state.store, keys::IPMANAGERS, network_uuid, &ipmanager).await?;
        Ok(addr)
    }
    .await;

    lock.release().await;
    result
}

/// Release a previously-allocated address under the same locking discipline.
pub async fn release_network_address(state: &AppState, network_uuid: &str, addr: &str) -> Result<()> {
    let lock_name = keys::ipmanager_lock(network_uuid);
    let lock = acquire_lock(state.store.clone(), &lock_name, timing::IPMANAGER_LOCK_TTL).await?;

    let result = async {
        if let Some(mut ipmanager) = repo::get::<IpManager>(&state.store, keys::IPMANAGERS, network_uuid).await? {
            ipmanager.release(addr);
            repo::put(&state.store, keys::IPMANAGERS, network_uuid, &ipmanager).await?;
        }
        Ok(())
    }
    .await;

    lock.release().await;
    result
}

async fn rollback_ip_allocations(state: &AppState, allocated: &[(String, String)]) {
    for (network_uuid, addr) in allocated {
        if let Err(e) = release_network_address(state, network_uuid, addr).await {
            tracing::warn!(network = network_uuid, error = %e, "failed to release address during rollback");
        }
    }
}

/// Release every non-deleted interface of `instance_uuid` and its IP address,
/// marking each interface `deleted`. Used by the delete handler; leaves the
/// instance record itself untouched.
pub async fn teardown_interfaces(state: &AppState, instance_uuid: &str) -> Result<()> {
    let interfaces: Vec<NetworkInterface> = repo::scan(&state.store, keys::INTERFACES).await?;
    for mut iface in interfaces
        .into_iter()
        .filter(|i| i.instance_uuid == instance_uuid && i.state != InterfaceState::Deleted)
    {
        release_network_address(state, &iface.network_uuid, &iface.ipv4).await?;
        if let Some(floating_addr) = iface.floating.clone() {
            if let Ok(floating_network) = crate::netops::find_floating_network(state).await {
                release_network_address(state, &floating_network.uuid, &floating_addr).await?;
            }
        }
        iface.state = InterfaceState::Deleted;
        repo::put(&state.store, keys::INTERFACES, &iface.uuid, &iface).await?;
    }
    Ok(())
}

async fn build_disks(state: &AppState, instance_uuid: &str, disks: &[DiskRequest]) -> Result<Vec<DiskAttachment>> {
    let instance_dir = PathBuf::from(&state.config.storage_path).join("instances").join(instance_uuid);
    let mut attachments = Vec::with_capacity(disks.len());

    for (idx, disk) in disks.iter().enumerate() {
        let dest = instance_dir.join(format!("disk{idx}.qcow2"));

        match &disk.base {
            Some(base) => {
                let cache_path = state.images.fetch(base).await?;
                sf_images::derive_disk(&cache_path, &dest, DiskDerivation::Cow).await?;
                let current = sf_images::transcode::virtual_size_bytes(&dest).await?;
                let target = disk.size_gb * (1u64 << 30);
                if current != target {
                    sf_images::transcode::resize_in_place(&dest, disk.size_gb).await?;
                }
            }
            None => {
                if tokio::fs::metadata(&dest).await.is_err() {
                    if let Some(parent) = dest.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| Error::Internal(format!("creating {parent:?}: {e}")))?;
                    }
                    sf_images::transcode::create_blank(&dest, disk.size_gb).await?;
                }
            }
        }

        attachments.push(DiskAttachment {
            path: dest.display().to_string(),
            bus: "virtio".to_string(),
        });
    }

    Ok(attachments)
}
