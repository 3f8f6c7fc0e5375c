//! Triggers worker (§4.4 startup step 4): tails each resident instance's
//! console log and raises events on well-known boot/crash patterns. Each
//! marker fires at most once per instance per boot - without that, a
//! guest sitting at a login prompt would re-emit the same event on every
//! tick for as long as it stayed up.

use std::collections::HashSet;
use std::sync::Arc;

use sf_api::events::append_event;
use sf_api::{repo, AppState};
use sf_core::config::{keys, timing};
use sf_core::error::Result;
use sf_core::model::{Instance, InstanceState};
use tracing::warn;

const BOOTED_MARKER: &str = "login:";
const PANIC_MARKER: &str = "Kernel panic";

pub async fn run(state: Arc<AppState>) {
    let mut fired_booted: HashSet<String> = HashSet::new();
    let mut fired_panic: HashSet<String> = HashSet::new();

    loop {
        match scan(&state, &mut fired_booted, &mut fired_panic).await {
            Ok(live) => {
                fired_booted.retain(|uuid| live.contains(uuid));
                fired_panic.retain(|uuid| live.contains(uuid));
            }
            Err(e) => warn!(error = %e, "triggers: scan pass failed"),
        }
        tokio::time::sleep(timing::TRIGGERS_TICK).await;
    }
}

async fn scan(
    state: &AppState,
    fired_booted: &mut HashSet<String>,
    fired_panic: &mut HashSet<String>,
) -> Result<HashSet<String>> {
    let instances: Vec<Instance> = repo::scan(&state.store, keys::INSTANCES).await?;
    let mine: Vec<Instance> = instances
        .into_iter()
        .filter(|i| i.node.as_deref() == Some(state.config.node_name.as_str()) && i.state == InstanceState::Created)
        .collect();

    let live: HashSet<String> = mine.iter().map(|i| i.uuid.clone()).collect();

    for instance in &mine {
        let log = match state.hypervisor.console_log(&instance.uuid).await {
            Ok(log) => log,
            Err(e) => {
                warn!(instance = %instance.uuid, error = %e, "triggers: failed to read console log");
                continue;
            }
        };

        if log.contains(BOOTED_MARKER) && fired_booted.insert(instance.uuid.clone()) {
            append_event(
                state,
                "instance",
                &instance.uuid,
                "triggers",
                "login-prompt",
                "console reached a login prompt",
            )
            .await?;
        }

        if log.contains(PANIC_MARKER) && fired_panic.insert(instance.uuid.clone()) {
            append_event(
                state,
                "instance",
                &instance.uuid,
                "triggers",
                "kernel-panic",
                "console shows a kernel panic",
            )
            .await?;
        }
    }

    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sf_hypervisor::{DomainSpec, HypervisorDriver, PowerAction};
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// Serves a fixed console log per instance instead of logging a no-op,
    /// so the marker-matching logic below can be exercised without a real
    /// hypervisor.
    #[derive(Default)]
    struct FakeConsoleHypervisor {
        logs: RwLock<HashMap<String, String>>,
    }

    #[async_trait]
    impl HypervisorDriver for FakeConsoleHypervisor {
        async fn ensure_running(&self, _spec: &DomainSpec) -> Result<()> {
            Ok(())
        }
        async fn power_action(&self, _instance_uuid: &str, _action: PowerAction) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self, _instance_uuid: &str) -> Result<()> {
            Ok(())
        }
        async fn is_running(&self, _instance_uuid: &str) -> Result<bool> {
            Ok(true)
        }
        async fn console_log(&self, instance_uuid: &str) -> Result<String> {
            Ok(self.logs.read().await.get(instance_uuid).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn booted_marker_fires_once_per_boot() {
        let hypervisor = Arc::new(FakeConsoleHypervisor::default());
        hypervisor
            .logs
            .write()
            .await
            .insert("i-1".to_string(), "Ubuntu 22.04 LTS i-1 ttyS0\n\nlogin: ".to_string());

        let state = crate::test_support::test_state_with_hypervisor(
            "node-a",
            "/tmp/sf-node-test-triggers",
            hypervisor,
        )
        .await;

        let mut instance = Instance::new("i-1".into(), "test".into(), 1, 512, vec![]);
        instance.node = Some("node-a".into());
        instance.state = InstanceState::Created;
        repo::put(&state.store, keys::INSTANCES, "i-1", &instance).await.unwrap();

        let mut fired_booted = HashSet::new();
        let mut fired_panic = HashSet::new();

        scan(&state, &mut fired_booted, &mut fired_panic).await.unwrap();
        scan(&state, &mut fired_booted, &mut fired_panic).await.unwrap();

        assert!(fired_booted.contains("i-1"));

        let events: Vec<sf_core::model::Event> =
            repo::scan_nested(&state.store, keys::EVENTS, "instance/i-1").await.unwrap();
        let login_events = events.iter().filter(|e| e.verb == "login-prompt").count();
        assert_eq!(login_events, 1);
    }

    #[tokio::test]
    async fn dedup_set_is_purged_once_instance_is_no_longer_live() {
        let hypervisor = Arc::new(FakeConsoleHypervisor::default());
        hypervisor
            .logs
            .write()
            .await
            .insert("i-1".to_string(), "login: ".to_string());

        let state = crate::test_support::test_state_with_hypervisor(
            "node-a",
            "/tmp/sf-node-test-triggers-purge",
            hypervisor,
        )
        .await;

        let mut instance = Instance::new("i-1".into(), "test".into(), 1, 512, vec![]);
        instance.node = Some("node-a".into());
        instance.state = InstanceState::Created;
        repo::put(&state.store, keys::INSTANCES, "i-1", &instance).await.unwrap();

        let mut fired_booted = HashSet::new();
        let mut fired_panic = HashSet::new();
        let live = scan(&state, &mut fired_booted, &mut fired_panic).await.unwrap();
        assert!(live.contains("i-1"));
        assert!(fired_booted.contains("i-1"));

        instance.mark_deleted();
        repo::put(&state.store, keys::INSTANCES, "i-1", &instance).await.unwrap();

        let live = scan(&state, &mut fired_booted, &mut fired_panic).await.unwrap();
        fired_booted.retain(|uuid| live.contains(uuid));
        assert!(!fired_booted.contains("i-1"));
    }
}
