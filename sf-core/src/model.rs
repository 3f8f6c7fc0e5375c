//! Entities persisted as JSON values in the coordination store's flat KV
//! namespace. None of these types carry their own storage logic - that lives
//! in sf-coord, keyed off the prefixes defined in [`crate::config::keys`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub ip: String,
    pub fqdn: String,
    pub lastseen: DateTime<Utc>,
    pub free_cpu: u32,
    pub free_ram_mb: u64,
    pub free_disk_gb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerState {
    Initial,
    On,
    Off,
    TransitionToOn,
    TransitionToOff,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Initial,
    Created,
    Deleted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpec {
    pub size_gb: u64,
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: String,
    pub name: String,
    pub vcpus: u32,
    pub memory_mb: u64,
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    /// Write-once: set exactly once by placement, never changed after.
    pub node: Option<String>,
    pub power_state: PowerState,
    pub state: InstanceState,
    /// Set when `state` transitions to `deleted`; the cleaner reaps the
    /// record once this is older than [`crate::config::timing::CLEANER_GRACE_PERIOD`].
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(uuid: String, name: String, vcpus: u32, memory_mb: u64, disks: Vec<DiskSpec>) -> Self {
        Self {
            uuid,
            name,
            vcpus,
            memory_mb,
            disks,
            ssh_key: None,
            user_data: None,
            node: None,
            power_state: PowerState::Initial,
            state: InstanceState::Initial,
            deleted_at: None,
        }
    }

    pub fn mark_deleted(&mut self) {
        self.state = InstanceState::Deleted;
        self.power_state = PowerState::Off;
        self.deleted_at = Some(Utc::now());
    }

    pub fn total_disk_gb(&self) -> u64 {
        self.disks.iter().map(|d| d.size_gb).sum()
    }
}

pub const FLOATING_NETWORK_NAME: &str = "floating";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Initial,
    Created,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    /// Unique cluster-wide; allocated under a network-wide lock so no two
    /// networks can ever race onto the same id.
    pub vxlan_id: u32,
    pub netblock: String,
    pub provide_dhcp: bool,
    pub provide_nat: bool,
    pub owner: String,
    pub name: String,
    pub state: NetworkState,
    #[serde(default)]
    pub floating_gateway: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Network {
    pub fn is_floating(&self) -> bool {
        self.name == FLOATING_NETWORK_NAME
    }

    pub fn mark_deleted(&mut self) {
        self.state = NetworkState::Deleted;
        self.deleted_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    Initial,
    Created,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub uuid: String,
    pub instance_uuid: String,
    pub network_uuid: String,
    pub ipv4: String,
    pub macaddr: String,
    pub model: String,
    pub order: u32,
    #[serde(default)]
    pub floating: Option<String>,
    pub state: InterfaceState,
}

/// Per-network address allocator, persisted as a single value guarded by the
/// named lock `sf/ipmanager/<network_uuid>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpManager {
    pub network_uuid: String,
    pub netblock: String,
    pub in_use: BTreeSet<String>,
    /// Number of low-order addresses reserved (network, gateway, broadcast, ...)
    /// and never handed out by `allocate_random`.
    pub reserved_prefix_suffix: u32,
}

impl IpManager {
    pub fn new(network_uuid: String, netblock: String) -> Self {
        Self {
            network_uuid,
            netblock,
            in_use: BTreeSet::new(),
            reserved_prefix_suffix: 3,
        }
    }

    fn network(&self) -> crate::error::Result<ipnet::Ipv4Net> {
        self.netblock
            .parse::<ipnet::Ipv4Net>()
            .map_err(|e| crate::error::Error::BadRequest(format!("invalid netblock: {e}")))
    }

    /// Reserve a caller-specified address. Fails with Conflict if already in
    /// use, or BadRequest if it's outside the netblock.
    pub fn reserve(&mut self, addr: &str) -> crate::error::Result<()> {
        let net = self.network()?;
        let ip: std::net::Ipv4Addr = addr
            .parse()
            .map_err(|_| crate::error::Error::BadRequest(format!("invalid address: {addr}")))?;
        if !net.contains(&ip) {
            return Err(crate::error::Error::BadRequest(format!(
                "address {addr} not in netblock {}",
                self.netblock
            )));
        }
        if self.in_use.contains(addr) {
            return Err(crate::error::Error::Conflict(format!(
                "address {addr} in use"
            )));
        }
        self.in_use.insert(addr.to_string());
        Ok(())
    }

    /// Allocate a random free address. Fails with InsufficientCapacity (507)
    /// when the block is exhausted.
    pub fn allocate_random(&mut self) -> crate::error::Result<String> {
        let net = self.network()?;
        let hosts: Vec<std::net::Ipv4Addr> = net.hosts().collect();
        let skip = self.reserved_prefix_suffix as usize;
        let candidates: Vec<&std::net::Ipv4Addr> = hosts
            .iter()
            .skip(skip)
            .filter(|ip| !self.in_use.contains(&ip.to_string()))
            .collect();
        if candidates.is_empty() {
            return Err(crate::error::Error::InsufficientCapacity);
        }
        // Deterministic pseudo-random pick so tests are reproducible; callers
        // needing uniform randomness can shuffle `candidates` themselves.
        let idx = (self.in_use.len() * 2654435761) % candidates.len();
        let addr = candidates[idx].to_string();
        self.in_use.insert(addr.clone());
        Ok(addr)
    }

    pub fn release(&mut self, addr: &str) {
        self.in_use.remove(addr);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub object_type: String,
    pub object_uuid: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub verb: String,
    #[serde(default)]
    pub extra: serde_json::Value,
    pub message: String,
}

impl Event {
    pub fn new(
        object_type: impl Into<String>,
        object_uuid: impl Into<String>,
        source: impl Into<String>,
        verb: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_uuid: object_uuid.into(),
            timestamp: Utc::now(),
            source: source.into(),
            verb: verb.into(),
            extra: serde_json::Value::Null,
            message: message.into(),
        }
    }
}

/// Cached image metadata, keyed by `content_hash = SHA-256(resolved_url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheRecord {
    pub url: String,
    pub content_hash: String,
    pub version: u32,
    pub fetched_at: DateTime<Utc>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

/// A pending per-node job drained by the queues worker (§2 "Queues worker").
/// The only operation the source enqueues is a delete, raised when restore
/// fails to bring an instance back up (§4.4 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOp {
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub uuid: String,
    pub node: String,
    pub instance_uuid: String,
    pub op: QueueOp,
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn delete(node: impl Into<String>, instance_uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uuid: new_uuid(),
            node: node.into(),
            instance_uuid: instance_uuid.into(),
            op: QueueOp::Delete,
            reason: reason.into(),
            enqueued_at: Utc::now(),
        }
    }
}

pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod ip_manager_tests {
    use super::*;

    #[test]
    fn reserve_rejects_address_outside_netblock() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/24".into());
        let err = mgr.reserve("10.0.1.5").unwrap_err();
        assert!(matches!(err, crate::error::Error::BadRequest(_)));
    }

    #[test]
    fn reserve_rejects_malformed_address() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/24".into());
        let err = mgr.reserve("not-an-ip").unwrap_err();
        assert!(matches!(err, crate::error::Error::BadRequest(_)));
    }

    #[test]
    fn reserve_conflict_on_double_booking() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/24".into());
        mgr.reserve("10.0.0.5").unwrap();
        let err = mgr.reserve("10.0.0.5").unwrap_err();
        assert!(matches!(err, crate::error::Error::Conflict(_)));
    }

    #[test]
    fn allocate_random_avoids_reserved_and_in_use_addresses() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/30".into());
        // /30 has 2 usable hosts; reserved_prefix_suffix skips 3, so nothing
        // is left to hand out until it's relaxed.
        mgr.reserved_prefix_suffix = 0;
        let a = mgr.allocate_random().unwrap();
        let b = mgr.allocate_random().unwrap();
        assert_ne!(a, b);
        assert!(mgr.in_use.contains(&a));
        assert!(mgr.in_use.contains(&b));
    }

    #[test]
    fn allocate_random_exhaustion_is_insufficient_capacity() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/30".into());
        mgr.reserved_prefix_suffix = 0;
        mgr.allocate_random().unwrap();
        mgr.allocate_random().unwrap();
        let err = mgr.allocate_random().unwrap_err();
        assert!(matches!(err, crate::error::Error::InsufficientCapacity));
    }

    #[test]
    fn release_frees_the_address_for_reuse() {
        let mut mgr = IpManager::new("net-1".into(), "10.0.0.0/30".into());
        mgr.reserved_prefix_suffix = 0;
        let a = mgr.allocate_random().unwrap();
        mgr.release(&a);
        assert!(!mgr.in_use.contains(&a));
        // now reservable again
        mgr.reserve(&a).unwrap();
    }

    #[test]
    fn invalid_netblock_surfaces_as_bad_request() {
        let mut mgr = IpManager::new("net-1".into(), "not-a-cidr".into());
        let err = mgr.reserve("10.0.0.5").unwrap_err();
        assert!(matches!(err, crate::error::Error::BadRequest(_)));
    }
}

/// Deterministic MAC in the QEMU/KVM locally-administered range, derived
/// from an interface id so two interfaces never collide without needing a
/// coordinated allocator.
pub fn generate_mac_from_id(id: &str) -> String {
    let bytes = id.as_bytes();
    let mut hash: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        hash = hash.wrapping_add((b as u64).wrapping_mul(31u64.wrapping_pow(i as u32)));
    }
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        ((hash >> 16) & 0xff) as u8,
        ((hash >> 8) & 0xff) as u8,
        (hash & 0xff) as u8
    )
}
