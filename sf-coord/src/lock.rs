//! Scoped lock handles and the keep-alive group used to refresh them across
//! long operations (image fetch, transcode - §4.3, §5).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::CoordinationStore;

/// A held, named, TTL'd lock. Release is attempted on every exit path: the
/// caller may call [`LockHandle::release`] explicitly, or simply drop the
/// handle, which fires a best-effort background release. Correctness does
/// not depend on the drop firing - the lock's TTL expires it regardless.
pub struct LockHandle {
    store: Arc<dyn CoordinationStore>,
    name: String,
    holder: String,
    ttl: Duration,
    released: bool,
}

impl LockHandle {
    pub(crate) fn new(store: Arc<dyn CoordinationStore>, name: String, holder: String, ttl: Duration) -> Self {
        Self {
            store,
            name,
            holder,
            ttl,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extend the lease atomically. Fails if another holder has since taken
    /// the lock (meaning this handle's TTL already lapsed).
    pub async fn refresh(&self) -> sf_core::Result<()> {
        self.store.refresh_lock(&self.name, &self.holder, self.ttl).await
    }

    /// Release the lock now, rather than waiting for drop.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.release_lock(&self.name, &self.holder).await {
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let name = self.name.clone();
        let holder = self.holder.clone();
        tokio::spawn(async move {
            if let Err(e) = store.release_lock(&name, &holder).await {
                warn!(lock = %name, error = %e, "failed to release lock on drop");
            }
        });
    }
}

/// Threads a set of held locks through a long operation, refreshing all of
/// them on a fixed interval so a slow fetch or transcode never outlives its
/// leases (§4.3 step 5, §9 Design Notes).
pub struct KeepAliveGroup {
    handles: Vec<Arc<LockHandle>>,
    stop: tokio::sync::watch::Sender<bool>,
}

impl KeepAliveGroup {
    /// Start refreshing `handles` every `period` until the returned group is
    /// dropped or [`KeepAliveGroup::stop`] is called.
    pub fn start(handles: Vec<LockHandle>, period: Duration) -> Self {
        let handles: Vec<Arc<LockHandle>> = handles.into_iter().map(Arc::new).collect();
        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);

        let task_handles = handles.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for h in &task_handles {
                            if let Err(e) = h.refresh().await {
                                warn!(lock = %h.name(), error = %e, "keep-alive refresh failed");
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Self {
            handles,
            stop: stop_tx,
        }
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for KeepAliveGroup {
    fn drop(&mut self) {
        self.stop();
    }
}
