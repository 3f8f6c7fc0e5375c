//! The coordination store contract (§4.2) and its two backings: a
//! Raft-replicated one for production clusters, and an in-process one for
//! single-node development and tests - mirroring the `--dev` flag the
//! control plane exposes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mraft::{NodeConfig, NodeId, RaftNode, StorageBackend};
use serde_json::Value;
use sf_core::error::{Error, Result};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::command::{Command, Response};
use crate::lock::LockHandle;
use crate::state::CoordState;

/// A value change on a watched prefix, used by the queues worker (§4.2).
#[derive(Debug, Clone)]
pub struct Change {
    pub key: String,
    pub value: Option<Value>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, prefix: &str, subkey: &str, key: &str) -> Result<Option<Value>>;
    async fn put(&self, prefix: &str, subkey: &str, key: &str, value: Value) -> Result<()>;
    async fn delete(&self, prefix: &str, subkey: &str, key: &str) -> Result<()>;
    /// Enumerate a collection via its prefix (there are no secondary indexes).
    async fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Low-level single attempt; `acquire_lock` below is the ergonomic entry
    /// point most callers want.
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;
    async fn refresh_lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<()>;
    async fn release_lock(&self, name: &str, holder: &str) -> Result<()>;

    async fn register_lease(&self, name: &str, key: &str, ttl: Duration) -> Result<()>;
    async fn refresh_lease(&self, name: &str, ttl: Duration) -> Result<()>;
    /// A lease-backed key is considered live iff its lease has not expired -
    /// reads may be stale up to the TTL, per §4.2 Failure semantics.
    async fn lease_is_live(&self, name: &str) -> Result<bool>;

    fn subscribe(&self) -> broadcast::Receiver<Change>;
}

/// Acquire the named lock, looping until it either succeeds or hits a
/// three-attempt ceiling with a short backoff - contention on these locks
/// is expected to be brief (§4.2, advisory mutual exclusion).
pub async fn acquire_lock(
    store: Arc<dyn CoordinationStore>,
    name: &str,
    ttl: Duration,
) -> Result<LockHandle> {
    let holder = Uuid::new_v4().to_string();
    for attempt in 0..3 {
        if store.try_acquire(name, &holder, ttl).await? {
            return Ok(LockHandle::new(store, name.to_string(), holder, ttl));
        }
        if attempt < 2 {
            tokio::time::sleep(Duration::from_millis(50 * (attempt + 1) as u64)).await;
        }
    }
    Err(Error::Conflict(format!("lock {name} held by another caller")))
}

fn full_key(prefix: &str, subkey: &str, key: &str) -> String {
    if subkey.is_empty() {
        format!("{prefix}/{key}")
    } else {
        format!("{prefix}/{subkey}/{key}")
    }
}

// ---------------------------------------------------------------------
// Raft-backed store (production)
// ---------------------------------------------------------------------

pub struct RaftCoordStore {
    node: Arc<RwLock<RaftNode<Command, Response, CoordState>>>,
    changes: broadcast::Sender<Change>,
}

impl RaftCoordStore {
    pub fn new(node: Arc<RwLock<RaftNode<Command, Response, CoordState>>>) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self { node, changes }
    }

    /// Bootstrap a single-node (dev) or joinable cluster node. Mirrors
    /// mvirt-api's own startup sequence for the Raft layer.
    pub async fn bootstrap(
        id: NodeId,
        listen_addr: String,
        peers: BTreeMap<NodeId, String>,
        storage: StorageBackend,
    ) -> Result<Arc<Self>> {
        let config = NodeConfig {
            id,
            listen_addr,
            peers,
            storage,
            raft_config: None,
        };
        let mut node: RaftNode<Command, Response, CoordState> = RaftNode::new(config)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        node.start()
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        node.generate_cluster_secret();
        node.initialize_cluster()
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(Arc::new(Self::new(Arc::new(RwLock::new(node)))))
    }

    async fn write(&self, cmd: Command) -> Result<Response> {
        let node = self.node.read().await;
        node.write_or_forward(cmd)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))
    }
}

#[async_trait]
impl CoordinationStore for RaftCoordStore {
    async fn get(&self, prefix: &str, subkey: &str, key: &str) -> Result<Option<Value>> {
        let node = self.node.read().await;
        let state = node.get_state().await;
        Ok(state.get(&full_key(prefix, subkey, key)))
    }

    async fn put(&self, prefix: &str, subkey: &str, key: &str, value: Value) -> Result<()> {
        let full = full_key(prefix, subkey, key);
        let resp = self
            .write(Command::Put {
                request_id: Uuid::new_v4().to_string(),
                key: full.clone(),
                value: value.clone(),
            })
            .await?;
        match resp {
            Response::Ok => {
                let _ = self.changes.send(Change {
                    key: full,
                    value: Some(value),
                });
                Ok(())
            }
            Response::Error { message, .. } => Err(Error::Internal(message)),
            _ => Err(Error::Internal("unexpected response to Put".into())),
        }
    }

    async fn delete(&self, prefix: &str, subkey: &str, key: &str) -> Result<()> {
        let full = full_key(prefix, subkey, key);
        let resp = self
            .write(Command::Delete {
                request_id: Uuid::new_v4().to_string(),
                key: full.clone(),
            })
            .await?;
        match resp {
            Response::Ok => {
                let _ = self.changes.send(Change {
                    key: full,
                    value: None,
                });
                Ok(())
            }
            Response::Error { message, .. } => Err(Error::Internal(message)),
            _ => Err(Error::Internal("unexpected response to Delete".into())),
        }
    }

    async fn prefix_scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let node = self.node.read().await;
        let state = node.get_state().await;
        Ok(state.prefix_scan(prefix))
    }

    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let resp = self
            .write(Command::AcquireLock {
                request_id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                holder: holder.to_string(),
                now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap(),
            })
            .await?;
        match resp {
            Response::LockGranted => Ok(true),
            Response::LockDenied { .. } => Ok(false),
            Response::Error { message, .. } => Err(Error::Internal(message)),
            _ => Err(Error::Internal("unexpected response to AcquireLock".into())),
        }
    }

    async fn refresh_lock(&self, name: &str, holder: &str, ttl: Duration) -> Result<()> {
        let resp = self
            .write(Command::RefreshLock {
                request_id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                holder: holder.to_string(),
                expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap(),
            })
            .await?;
        match resp {
            Response::LockGranted => Ok(()),
            Response::LockDenied { held_by } => Err(Error::Conflict(format!(
                "lock {name} no longer held (now held by {held_by:?})"
            ))),
            Response::Error { message, .. } => Err(Error::Internal(message)),
            _ => Err(Error::Internal("unexpected response to RefreshLock".into())),
        }
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<()> {
        self.write(Command::ReleaseLock {
            request_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            holder: holder.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn register_lease(&self, name: &str, key: &str, ttl: Duration) -> Result<()> {
        self.write(Command::RegisterLease {
            request_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            key: key.to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap(),
        })
        .await?;
        Ok(())
    }

    async fn refresh_lease(&self, name: &str, ttl: Duration) -> Result<()> {
        self.write(Command::RefreshLease {
            request_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap(),
        })
        .await?;
        Ok(())
    }

    async fn lease_is_live(&self, name: &str) -> Result<bool> {
        let node = self.node.read().await;
        let state = node.get_state().await;
        Ok(state.lease_is_live(name, Utc::now()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    async fn dev_store() -> Arc<RaftCoordStore> {
        RaftCoordStore::bootstrap(1, "127.0.0.1:0".into(), BTreeMap::new(), StorageBackend::Memory)
            .await
            .expect("bootstrap dev store")
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = dev_store().await;
        store
            .put("nodes", "", "node-a", serde_json::json!({"ip": "10.0.0.1"}))
            .await
            .unwrap();
        let value = store.get("nodes", "", "node-a").await.unwrap();
        assert_eq!(value.unwrap()["ip"], "10.0.0.1");
    }

    #[tokio::test]
    async fn lock_denied_to_second_holder_while_live() {
        let store: Arc<dyn CoordinationStore> = dev_store().await;
        let a = acquire_lock(store.clone(), "sf/ipmanager/net-1", Duration::from_secs(60))
            .await
            .unwrap();
        let second = store.try_acquire("sf/ipmanager/net-1", "other", Duration::from_secs(60)).await.unwrap();
        assert!(!second);
        a.release().await;
        let third = store.try_acquire("sf/ipmanager/net-1", "other", Duration::from_secs(60)).await.unwrap();
        assert!(third);
    }
}
