//! Commands replicated through Raft and the responses they produce.
//!
//! Unlike mvirt's control plane, these commands know nothing about
//! instances, networks or nodes - the coordination layer is a generic
//! KV/lock/lease primitive (§4.2); domain semantics live entirely in the
//! API worker that calls it.
//!
//! IMPORTANT: timestamps (`expires_at`, lease expiry) are computed by the
//! caller before submission and carried on the command. Calling `Utc::now()`
//! inside `apply()` would make the state machine non-deterministic across
//! replicas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Put {
        request_id: String,
        key: String,
        value: Value,
    },
    Delete {
        request_id: String,
        key: String,
    },
    AcquireLock {
        request_id: String,
        name: String,
        holder: String,
        /// Wall-clock time the request was issued, fixed by the proposer
        /// before submission so every replica compares against the same
        /// instant instead of its own clock.
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    RefreshLock {
        request_id: String,
        name: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },
    ReleaseLock {
        request_id: String,
        name: String,
        holder: String,
    },
    RegisterLease {
        request_id: String,
        name: String,
        key: String,
        expires_at: DateTime<Utc>,
    },
    RefreshLease {
        request_id: String,
        name: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Value(Option<Value>),
    LockGranted,
    LockDenied { held_by: Option<String> },
    Error { code: u16, message: String },
}
