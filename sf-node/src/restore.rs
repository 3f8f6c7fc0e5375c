//! Startup reconciliation (§4.4 startup step 5): re-materialize every
//! network this node's instances reference, then boot whichever of those
//! instances was last known to be on, coming on, or in an unknown state.
//! A single instance's failure is logged and converted into a queued
//! delete; it never aborts the rest of the sequence.

use std::collections::HashSet;
use std::path::PathBuf;

use sf_api::events::append_event;
use sf_api::{repo, AppState};
use sf_core::config::keys;
use sf_core::error::Result;
use sf_core::model::{
    Instance, InterfaceState, Network, NetworkInterface, PowerState, QueueItem,
};
use sf_hypervisor::{DiskAttachment, DomainSpec, InterfaceAttachment};
use tracing::{info, warn};

pub async fn run(state: &AppState) {
    let instances: Vec<Instance> = match repo::scan(&state.store, keys::INSTANCES).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "restore: failed to list instances, skipping restore");
            return;
        }
    };
    let interfaces: Vec<NetworkInterface> = repo::scan(&state.store, keys::INTERFACES).await.unwrap_or_default();

    let mine: Vec<Instance> = instances
        .into_iter()
        .filter(|i| i.node.as_deref() == Some(state.config.node_name.as_str()))
        .collect();

    restore_networks(state, &mine, &interfaces).await;

    for instance in mine {
        if !matches!(
            instance.power_state,
            PowerState::On | PowerState::TransitionToOn | PowerState::Initial | PowerState::Unknown
        ) {
            continue;
        }

        if let Err(e) = restore_instance(state, &instance, &interfaces).await {
            warn!(instance = %instance.uuid, error = %e, "restore: failed to restore instance, enqueuing delete");
            enqueue_delete(state, &instance.uuid, "error").await;
            continue;
        }

        info!(instance = %instance.uuid, "restore: instance restored");
    }
}

async fn restore_networks(state: &AppState, mine: &[Instance], interfaces: &[NetworkInterface]) {
    let mut seen = HashSet::new();
    for iface in interfaces
        .iter()
        .filter(|i| mine.iter().any(|inst| inst.uuid == i.instance_uuid))
    {
        if !seen.insert(iface.network_uuid.clone()) {
            continue;
        }
        match repo::get::<Network>(&state.store, keys::NETWORKS, &iface.network_uuid).await {
            Ok(Some(network)) => {
                if let Err(e) = state.fabric.ensure_mesh_and_dhcp(&network).await {
                    warn!(network = %network.uuid, error = %e, "restore: failed to restore network");
                }
            }
            Ok(None) => warn!(network = %iface.network_uuid, "restore: referenced network missing"),
            Err(e) => warn!(network = %iface.network_uuid, error = %e, "restore: failed to load network"),
        }
    }
}

async fn restore_instance(state: &AppState, instance: &Instance, interfaces: &[NetworkInterface]) -> Result<()> {
    let domain_interfaces: Vec<InterfaceAttachment> = interfaces
        .iter()
        .filter(|i| i.instance_uuid == instance.uuid && i.state != InterfaceState::Deleted)
        .map(|i| InterfaceAttachment {
            mac_address: i.macaddr.clone(),
            model: i.model.clone(),
            bridge: format!("br-{}", i.network_uuid),
        })
        .collect();

    let instance_dir = PathBuf::from(&state.config.storage_path).join("instances").join(&instance.uuid);
    let disks: Vec<DiskAttachment> = instance
        .disks
        .iter()
        .enumerate()
        .map(|(idx, _)| DiskAttachment {
            path: instance_dir.join(format!("disk{idx}.qcow2")).display().to_string(),
            bus: "virtio".to_string(),
        })
        .collect();

    state
        .hypervisor
        .ensure_running(&DomainSpec {
            instance_uuid: instance.uuid.clone(),
            name: instance.name.clone(),
            vcpus: instance.vcpus,
            memory_mb: instance.memory_mb,
            disks,
            interfaces: domain_interfaces,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restore_boots_only_instances_in_bootable_power_states() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-restore").await;

        let mut booting = Instance::new("i-on".into(), "on".into(), 1, 512, vec![]);
        booting.node = Some("node-a".into());
        booting.power_state = PowerState::On;
        repo::put(&state.store, keys::INSTANCES, "i-on", &booting).await.unwrap();

        let mut off = Instance::new("i-off".into(), "off".into(), 1, 512, vec![]);
        off.node = Some("node-a".into());
        off.power_state = PowerState::Off;
        repo::put(&state.store, keys::INSTANCES, "i-off", &off).await.unwrap();

        let mut elsewhere = Instance::new("i-other-node".into(), "other".into(), 1, 512, vec![]);
        elsewhere.node = Some("node-b".into());
        elsewhere.power_state = PowerState::On;
        repo::put(&state.store, keys::INSTANCES, "i-other-node", &elsewhere).await.unwrap();

        run(&state).await;

        assert!(state.hypervisor.is_running("i-on").await.unwrap());
        assert!(!state.hypervisor.is_running("i-off").await.unwrap());
        assert!(!state.hypervisor.is_running("i-other-node").await.unwrap());
    }

    #[tokio::test]
    async fn restore_is_a_no_op_on_power_state_when_rerun() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-restore-rerun").await;

        let mut instance = Instance::new("i-1".into(), "test".into(), 1, 512, vec![]);
        instance.node = Some("node-a".into());
        instance.power_state = PowerState::On;
        repo::put(&state.store, keys::INSTANCES, "i-1", &instance).await.unwrap();

        run(&state).await;
        run(&state).await;

        let stored: Instance = repo::get(&state.store, keys::INSTANCES, "i-1").await.unwrap().unwrap();
        assert_eq!(stored.power_state, PowerState::On);
    }
}

async fn enqueue_delete(state: &AppState, instance_uuid: &str, reason: &str) {
    let item = QueueItem::delete(state.config.node_name.clone(), instance_uuid, reason);
    if let Err(e) = repo::put(&state.store, keys::QUEUES, &item.uuid, &item).await {
        warn!(instance = instance_uuid, error = %e, "restore: failed to enqueue delete after restore failure");
        return;
    }
    if let Err(e) = append_event(state, "instance", instance_uuid, "restore", "delete-enqueued", reason).await {
        warn!(instance = instance_uuid, error = %e, "restore: failed to record delete-enqueued event");
    }
}
