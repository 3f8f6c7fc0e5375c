//! The hypervisor driver boundary (§1 external collaborators: "the
//! hypervisor driver (libvirt/qemu)"). This crate only defines the contract
//! the instance creation pipeline invokes at its last step; the concrete
//! driver that shells out to libvirt or talks to a VMM API is supplied by
//! the deployment, not by this workspace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sf_core::error::Result;
use tokio::sync::RwLock;
use tracing::info;

pub mod fabric;
pub use fabric::{LoggingNetworkFabric, NetworkFabric};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub path: String,
    pub bus: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceAttachment {
    pub mac_address: String,
    pub model: String,
    pub bridge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSpec {
    pub instance_uuid: String,
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disks: Vec<DiskAttachment>,
    pub interfaces: Vec<InterfaceAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Reboot,
}

#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    /// Define the domain if it doesn't exist and start it (§4.5 step 8).
    async fn ensure_running(&self, spec: &DomainSpec) -> Result<()>;

    async fn power_action(&self, instance_uuid: &str, action: PowerAction) -> Result<()>;

    /// Undefine the domain and release any driver-held resources.
    async fn destroy(&self, instance_uuid: &str) -> Result<()>;

    async fn is_running(&self, instance_uuid: &str) -> Result<bool>;

    /// Tail of the guest's console log, scanned by the triggers worker for
    /// known boot/crash patterns. Returns an empty string for a domain with
    /// no console output yet.
    async fn console_log(&self, instance_uuid: &str) -> Result<String>;
}

/// Logs every call instead of acting on it. Useful standalone for the REST
/// layer's tests and for running the control plane without a real driver
/// wired up yet.
#[derive(Default)]
pub struct LoggingHypervisor {
    running: RwLock<HashMap<String, bool>>,
}

impl LoggingHypervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HypervisorDriver for LoggingHypervisor {
    async fn ensure_running(&self, spec: &DomainSpec) -> Result<()> {
        info!(
            instance = %spec.instance_uuid,
            vcpus = spec.vcpus,
            memory_mb = spec.memory_mb,
            disks = spec.disks.len(),
            interfaces = spec.interfaces.len(),
            "would define and start domain"
        );
        self.running.write().await.insert(spec.instance_uuid.clone(), true);
        Ok(())
    }

    async fn power_action(&self, instance_uuid: &str, action: PowerAction) -> Result<()> {
        info!(instance = instance_uuid, ?action, "would apply power action");
        let mut running = self.running.write().await;
        match action {
            PowerAction::On => {
                running.insert(instance_uuid.to_string(), true);
            }
            PowerAction::Off => {
                running.insert(instance_uuid.to_string(), false);
            }
            PowerAction::Reboot => {}
        }
        Ok(())
    }

    async fn destroy(&self, instance_uuid: &str) -> Result<()> {
        info!(instance = instance_uuid, "would destroy domain");
        self.running.write().await.remove(instance_uuid);
        Ok(())
    }

    async fn is_running(&self, instance_uuid: &str) -> Result<bool> {
        Ok(self.running.read().await.get(instance_uuid).copied().unwrap_or(false))
    }

    async fn console_log(&self, _instance_uuid: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_driver_tracks_run_state() {
        let driver = LoggingHypervisor::new();
        let spec = DomainSpec {
            instance_uuid: "i-1".into(),
            name: "test".into(),
            vcpus: 1,
            memory_mb: 512,
            disks: vec![],
            interfaces: vec![],
        };
        assert!(!driver.is_running("i-1").await.unwrap());
        driver.ensure_running(&spec).await.unwrap();
        assert!(driver.is_running("i-1").await.unwrap());
        driver.power_action("i-1", PowerAction::Off).await.unwrap();
        assert!(!driver.is_running("i-1").await.unwrap());
        driver.destroy("i-1").await.unwrap();
        assert!(!driver.is_running("i-1").await.unwrap());
    }
}
