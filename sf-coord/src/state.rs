//! Replicated state machine backing the coordination store: a flat KV map
//! plus named locks and leases, applied deterministically from [`Command`].

use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use mraft::StateMachine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{Command, Response};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordState {
    kv: HashMap<String, Value>,
    locks: HashMap<String, LockRecord>,
    leases: HashMap<String, LeaseRecord>,
    #[serde(skip)]
    applied_requests: Option<LruCache<String, Response>>,
}

impl Default for CoordState {
    fn default() -> Self {
        Self {
            kv: HashMap::new(),
            locks: HashMap::new(),
            leases: HashMap::new(),
            applied_requests: Some(LruCache::new(NonZeroUsize::new(4096).unwrap())),
        }
    }
}

impl CoordState {
    fn ensure_cache(&mut self) {
        if self.applied_requests.is_none() {
            self.applied_requests = Some(LruCache::new(NonZeroUsize::new(4096).unwrap()));
        }
    }

    /// Read path used by the store wrapper - bypasses Raft entirely, callers
    /// must tolerate staleness up to the lease TTL per §4.2.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.kv.get(key).cloned()
    }

    pub fn prefix_scan(&self, prefix: &str) -> Vec<(String, Value)> {
        let with_slash = format!("{prefix}/");
        let mut out: Vec<(String, Value)> = self
            .kv
            .iter()
            .filter(|(k, _)| k.starts_with(&with_slash) || *k == prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn lock_holder(&self, name: &str, now: DateTime<Utc>) -> Option<&LockRecord> {
        self.locks
            .get(name)
            .filter(|record| record.expires_at > now)
    }

    pub fn lease_is_live(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.leases
            .get(name)
            .map(|l| l.expires_at > now)
            .unwrap_or(false)
    }
}

fn request_id(cmd: &Command) -> &str {
    match cmd {
        Command::Put { request_id, .. }
        | Command::Delete { request_id, .. }
        | Command::AcquireLock { request_id, .. }
        | Command::RefreshLock { request_id, .. }
        | Command::ReleaseLock { request_id, .. }
        | Command::RegisterLease { request_id, .. }
        | Command::RefreshLease { request_id, .. } => request_id,
    }
}

impl StateMachine<Command, Response> for CoordState {
    fn apply(&mut self, cmd: Command) -> Response {
        self.ensure_cache();

        let rid = request_id(&cmd).to_string();
        if let Some(cache) = &self.applied_requests
            && let Some(cached) = cache.peek(&rid)
        {
            return cached.clone();
        }

        let response = match cmd {
            Command::Put { key, value, .. } => {
                self.kv.insert(key, value);
                Response::Ok
            }
            Command::Delete { key, .. } => {
                self.kv.remove(&key);
                Response::Ok
            }
            Command::AcquireLock {
                name,
                holder,
                now,
                expires_at,
                ..
            } => {
                // Expired or unheld locks are free to grant; a live lock
                // only re-grants to its current holder (refresh-via-acquire).
                let live_other_holder = self
                    .locks
                    .get(&name)
                    .filter(|existing| existing.expires_at > now && existing.holder != holder)
                    .map(|existing| existing.holder.clone());

                match live_other_holder {
                    Some(held_by) => Response::LockDenied {
                        held_by: Some(held_by),
                    },
                    None => {
                        self.locks.insert(name, LockRecord { holder, expires_at });
                        Response::LockGranted
                    }
                }
            }
            Command::RefreshLock {
                name,
                holder,
                expires_at,
                ..
            } => match self.locks.get_mut(&name) {
                Some(existing) if existing.holder == holder => {
                    existing.expires_at = expires_at;
                    Response::LockGranted
                }
                Some(existing) => Response::LockDenied {
                    held_by: Some(existing.holder.clone()),
                },
                None => Response::LockDenied { held_by: None },
            },
            Command::ReleaseLock { name, holder, .. } => {
                if let Some(existing) = self.locks.get(&name)
                    && existing.holder == holder
                {
                    self.locks.remove(&name);
                }
                Response::Ok
            }
            Command::RegisterLease {
                name,
                key,
                expires_at,
                ..
            } => {
                self.leases.insert(name, LeaseRecord { key, expires_at });
                Response::Ok
            }
            Command::RefreshLease {
                name, expires_at, ..
            } => {
                if let Some(lease) = self.leases.get_mut(&name) {
                    lease.expires_at = expires_at;
                }
                Response::Ok
            }
        };

        if let Some(cache) = &mut self.applied_requests {
            cache.put(rid, response.clone());
        }

        response
    }
}
