//! Queues worker (§4.4 startup step 4): drains per-node jobs enqueued by
//! restore (and, in future, other workers) onto this node. The only
//! operation today is a delete, raised when restore cannot bring an
//! instance back up.

use std::sync::Arc;

use sf_api::events::append_event;
use sf_api::{pipeline, repo, AppState};
use sf_core::config::{keys, timing};
use sf_core::error::Result;
use sf_core::model::{Instance, QueueItem, QueueOp};
use tracing::warn;

pub async fn run(state: Arc<AppState>) {
    loop {
        if let Err(e) = drain(&state).await {
            warn!(error = %e, "queues: drain pass failed");
        }
        tokio::time::sleep(timing::QUEUE_TICK).await;
    }
}

async fn drain(state: &AppState) -> Result<()> {
    let items: Vec<QueueItem> = repo::scan(&state.store, keys::QUEUES).await?;
    for item in items.into_iter().filter(|i| i.node == state.config.node_name) {
        if let Err(e) = process(state, &item).await {
            warn!(instance = %item.instance_uuid, error = %e, "queues: item failed, retrying next tick");
            continue;
        }
        state.store.delete(keys::QUEUES, "", &item.uuid).await?;
    }
    Ok(())
}

async fn process(state: &AppState, item: &QueueItem) -> Result<()> {
    match item.op {
        QueueOp::Delete => process_delete(state, item).await,
    }
}

async fn process_delete(state: &AppState, item: &QueueItem) -> Result<()> {
    let Some(mut instance): Option<Instance> = repo::get(&state.store, keys::INSTANCES, &item.instance_uuid).await?
    else {
        return Ok(());
    };

    state.hypervisor.destroy(&item.instance_uuid).await?;
    pipeline::teardown_interfaces(state, &item.instance_uuid).await?;

    instance.mark_deleted();
    repo::put(&state.store, keys::INSTANCES, &item.instance_uuid, &instance).await?;
    append_event(state, "instance", &item.instance_uuid, "queues", "deleted", &item.reason).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_core::model::{DiskSpec, InstanceState};

    #[tokio::test]
    async fn drain_deletes_instance_and_removes_item() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-queues").await;

        let instance = Instance::new("i-1".into(), "test".into(), 1, 512, vec![DiskSpec { size_gb: 10, base: None }]);
        repo::put(&state.store, keys::INSTANCES, "i-1", &instance).await.unwrap();

        let item = QueueItem::delete("node-a", "i-1", "error");
        repo::put(&state.store, keys::QUEUES, &item.uuid, &item).await.unwrap();

        drain(&state).await.unwrap();

        let stored: Instance = repo::get(&state.store, keys::INSTANCES, "i-1").await.unwrap().unwrap();
        assert_eq!(stored.state, InstanceState::Deleted);

        let remaining: Vec<QueueItem> = repo::scan(&state.store, keys::QUEUES).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn drain_ignores_items_for_other_nodes() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-queues-other").await;

        let instance = Instance::new("i-2".into(), "test".into(), 1, 512, vec![]);
        repo::put(&state.store, keys::INSTANCES, "i-2", &instance).await.unwrap();

        let item = QueueItem::delete("node-b", "i-2", "error");
        repo::put(&state.store, keys::QUEUES, &item.uuid, &item).await.unwrap();

        drain(&state).await.unwrap();

        let stored: Instance = repo::get(&state.store, keys::INSTANCES, "i-2").await.unwrap().unwrap();
        assert_eq!(stored.state, InstanceState::Initial);

        let remaining: Vec<QueueItem> = repo::scan(&state.store, keys::QUEUES).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn drain_is_a_no_op_for_an_already_vanished_instance() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-queues-vanished").await;

        let item = QueueItem::delete("node-a", "i-missing", "error");
        repo::put(&state.store, keys::QUEUES, &item.uuid, &item).await.unwrap();

        drain(&state).await.unwrap();

        let remaining: Vec<QueueItem> = repo::scan(&state.store, keys::QUEUES).await.unwrap();
        assert!(remaining.is_empty());
    }
}
