//! Environment-sourced configuration, per the External Interfaces contract.
//!
//! Every field is required unless noted; a missing or malformed variable is
//! a startup error, not a runtime one - we want to fail before we fork any
//! worker rather than limp along with defaults an operator didn't choose.

use std::collections::BTreeMap;
use std::env;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub node_ip: String,
    pub network_node_ip: String,
    pub node_egress_nic: String,
    pub api_port: u16,
    pub floating_network: String,
    pub auth_secret_seed: String,
    pub storage_path: String,
    pub include_tracebacks: bool,
    pub overcommit_cpu_ratio: f64,
    pub overcommit_ram_ratio: f64,
    /// Coordination layer wiring. Not part of §6's external-interfaces table
    /// (the distilled spec is silent on how nodes find each other's Raft
    /// endpoints) - supplements it with the minimum needed to bootstrap
    /// `sf-coord`'s backing store without a CLI, consistent with the
    /// command-line entry point being out of scope.
    pub coord: CoordConfig,
}

#[derive(Debug, Clone)]
pub struct CoordConfig {
    pub node_id: u64,
    pub listen_addr: String,
    pub peers: BTreeMap<u64, String>,
    /// Single-node, ephemeral-storage mode - mirrors the control plane's own `--dev` flag.
    pub dev: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let node_ip = required("NODE_IP")?;
        Ok(Self {
            node_name: required("NODE_NAME")?,
            network_node_ip: required("NETWORK_NODE_IP")?,
            node_egress_nic: required("NODE_EGRESS_NIC")?,
            api_port: required("API_PORT")?
                .parse()
                .map_err(|_| Error::Internal("API_PORT must be an integer".into()))?,
            floating_network: required("FLOATING_NETWORK")?,
            auth_secret_seed: required("AUTH_SECRET_SEED")?,
            storage_path: required("STORAGE_PATH")?,
            include_tracebacks: env::var("INCLUDE_TRACEBACKS").as_deref() == Ok("1"),
            overcommit_cpu_ratio: env_f64("OVERCOMMIT_CPU_RATIO", 16.0)?,
            overcommit_ram_ratio: env_f64("OVERCOMMIT_RAM_RATIO", 1.5)?,
            coord: CoordConfig::from_env(&node_ip)?,
            node_ip,
        })
    }

    pub fn is_network_node(&self) -> bool {
        self.node_ip == self.network_node_ip
    }
}

impl CoordConfig {
    fn from_env(node_ip: &str) -> Result<Self> {
        let node_id = match env::var("COORD_NODE_ID") {
            Ok(v) => v
                .parse()
                .map_err(|_| Error::Internal("COORD_NODE_ID must be an integer".into()))?,
            Err(_) => 1,
        };
        let listen_addr =
            env::var("COORD_LISTEN_ADDR").unwrap_or_else(|_| format!("{node_ip}:6001"));
        let peers = match env::var("COORD_PEERS") {
            Ok(raw) if !raw.is_empty() => parse_peers(&raw)?,
            _ => BTreeMap::new(),
        };
        let dev = env::var("COORD_DEV").as_deref() == Ok("1");
        Ok(Self {
            node_id,
            listen_addr,
            peers,
            dev,
        })
    }
}

fn parse_peers(raw: &str) -> Result<BTreeMap<u64, String>> {
    raw.split(',')
        .map(|entry| {
            let (id, addr) = entry
                .split_once(':')
                .ok_or_else(|| Error::Internal(format!("malformed COORD_PEERS entry: {entry}")))?;
            let id: u64 = id
                .parse()
                .map_err(|_| Error::Internal(format!("malformed COORD_PEERS node id: {id}")))?;
            Ok((id, addr.to_string()))
        })
        .collect()
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Internal(format!("missing required env var {name}")))
}

fn env_f64(name: &str, default: f64) -> Result<f64> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| Error::Internal(format!("{name} must be a number"))),
        Err(_) => Ok(default),
    }
}

/// Hierarchical key-space used by the coordination store (§6 Persistent layout).
pub mod keys {
    pub const NODES: &str = "nodes";
    pub const INSTANCES: &str = "instances";
    pub const NETWORKS: &str = "networks";
    pub const INTERFACES: &str = "interfaces";
    pub const IPMANAGERS: &str = "ipmanagers";
    pub const EVENTS: &str = "events";
    pub const PASSWORDS: &str = "passwords";
    pub const IMAGES: &str = "images";
    pub const QUEUES: &str = "queues";

    pub fn ipmanager_lock(network_uuid: &str) -> String {
        format!("sf/ipmanager/{network_uuid}")
    }

    pub fn image_lock(node: &str, hash: &str) -> String {
        format!("sf/images/{node}/{hash}")
    }

    pub fn instance_lock(uuid: &str) -> String {
        format!("sf/instances/{uuid}")
    }
}

/// Lease/lock timing constants (§5 Locks and leases).
pub mod timing {
    use std::time::Duration;

    pub const NODE_HEARTBEAT_LEASE: Duration = Duration::from_secs(30);
    pub const NODE_HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);
    pub const IPMANAGER_LOCK_TTL: Duration = Duration::from_secs(120);
    pub const IMAGE_LOCK_TTL: Duration = Duration::from_secs(600);
    pub const IMAGE_LOCK_REFRESH: Duration = Duration::from_secs(10);
    pub const MONITOR_TICK: Duration = Duration::from_secs(10);

    /// How long a tombstoned (deleted/error) record or a superseded image
    /// cache file sits before the cleaner reaps it (§3 "Lifecycles").
    pub const CLEANER_GRACE_PERIOD: Duration = Duration::from_secs(3600);
    pub const CLEANER_TICK: Duration = Duration::from_secs(300);
    pub const TRIGGERS_TICK: Duration = Duration::from_secs(15);
    pub const RESOURCES_PUBLISH_TICK: Duration = Duration::from_secs(20);

    /// Queue drain cadence - deliberately short, since a queued delete
    /// represents work a caller is waiting on (§4.4 step 5).
    pub const QUEUE_TICK: Duration = Duration::from_secs(5);
    /// How often the net worker re-checks that every resident network's
    /// mesh and DHCP are still in place, healing drift between restarts.
    pub const NET_RECONCILE_TICK: Duration = Duration::from_secs(30);
}
