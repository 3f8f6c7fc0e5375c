//! Cleaner worker (§4.4 startup step 4): reaps tombstoned instance and
//! network records once they are older than [`timing::CLEANER_GRACE_PERIOD`],
//! and the image cache's superseded version files left behind by a dirty
//! re-fetch (§4.3 "Failure semantics" / "intermediate files ... reclaimed
//! by the cleaner").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use sf_api::{repo, AppState};
use sf_core::config::{keys, timing};
use sf_core::error::Result;
use sf_core::model::{Instance, InstanceState, Network, NetworkState};
use tracing::{info, warn};

pub async fn run(state: Arc<AppState>) {
    loop {
        if let Err(e) = sweep(&state).await {
            warn!(error = %e, "cleaner: sweep failed");
        }
        tokio::time::sleep(timing::CLEANER_TICK).await;
    }
}

async fn sweep(state: &AppState) -> Result<()> {
    reap_instances(state).await?;
    reap_networks(state).await?;
    reap_stale_image_versions(state).await;
    Ok(())
}

async fn reap_instances(state: &AppState) -> Result<()> {
    let grace = chrono::Duration::from_std(timing::CLEANER_GRACE_PERIOD).expect("constant duration fits");
    let now = Utc::now();

    let instances: Vec<Instance> = repo::scan(&state.store, keys::INSTANCES).await?;
    for instance in instances.into_iter().filter(|i| i.state == InstanceState::Deleted) {
        let Some(deleted_at) = instance.deleted_at else { continue };
        if now.signed_duration_since(deleted_at) > grace {
            state.store.delete(keys::INSTANCES, "", &instance.uuid).await?;
            info!(instance = %instance.uuid, "cleaner: reaped tombstoned instance");
        }
    }
    Ok(())
}

async fn reap_networks(state: &AppState) -> Result<()> {
    let grace = chrono::Duration::from_std(timing::CLEANER_GRACE_PERIOD).expect("constant duration fits");
    let now = Utc::now();

    let networks: Vec<Network> = repo::scan(&state.store, keys::NETWORKS).await?;
    for network in networks.into_iter().filter(|n| n.state == NetworkState::Deleted) {
        let Some(deleted_at) = network.deleted_at else { continue };
        if now.signed_duration_since(deleted_at) > grace {
            state.store.delete(keys::NETWORKS, "", &network.uuid).await?;
            info!(network = %network.uuid, "cleaner: reaped tombstoned network");
        }
    }
    Ok(())
}

/// Walk `image_cache/` and remove `<hash>.v<NNN>` (and its `.orig`
/// decompression, if any) once it is no longer the version recorded in
/// `<hash>.info` and has sat untouched for a full grace period. Best
/// effort: a missing or unreadable cache directory is not an error, since
/// this node may not have fetched any images yet.
async fn reap_stale_image_versions(state: &AppState) {
    let root = PathBuf::from(&state.config.storage_path).join("image_cache");
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(e) => e,
        Err(_) => return,
    };

    let mut current_versions: HashMap<String, u32> = HashMap::new();
    let mut version_files: Vec<(String, u32, PathBuf)> = Vec::new();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "cleaner: failed to read image cache directory");
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();

        if let Some(hash) = name.strip_suffix(".info") {
            if let Some(version) = read_current_version(&path).await {
                current_versions.insert(hash.to_string(), version);
            }
            continue;
        }
        if let Some((hash, suffix)) = name.split_once(".v") {
            if let Ok(version) = suffix.parse::<u32>() {
                version_files.push((hash.to_string(), version, path));
            }
        }
    }

    let now = SystemTime::now();
    for (hash, version, path) in version_files {
        if current_versions.get(&hash) == Some(&version) {
            continue;
        }
        if !older_than_grace(&path, now).await {
            continue;
        }
        if tokio::fs::remove_file(&path).await.is_ok() {
            info!(hash, version, "cleaner: reaped superseded image cache version");
        }
        let orig = PathBuf::from(format!("{}.orig", path.display()));
        let _ = tokio::fs::remove_file(&orig).await;
    }
}

async fn read_current_version(info_path: &std::path::Path) -> Option<u32> {
    let bytes = tokio::fs::read(info_path).await.ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("version")?.as_u64().map(|v| v as u32)
}

async fn older_than_grace(path: &std::path::Path, now: SystemTime) -> bool {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|modified| now.duration_since(modified).ok())
        .map(|age| age > timing::CLEANER_GRACE_PERIOD)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sf_core::model::DiskSpec;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn reap_instances_only_removes_tombstones_past_grace_period() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-cleaner-instances").await;

        let mut stale = Instance::new("i-stale".into(), "stale".into(), 1, 512, vec![DiskSpec { size_gb: 5, base: None }]);
        stale.mark_deleted();
        stale.deleted_at = Some(Utc::now() - ChronoDuration::from_std(timing::CLEANER_GRACE_PERIOD).unwrap() - ChronoDuration::seconds(1));
        repo::put(&state.store, keys::INSTANCES, "i-stale", &stale).await.unwrap();

        let mut fresh = Instance::new("i-fresh".into(), "fresh".into(), 1, 512, vec![]);
        fresh.mark_deleted();
        repo::put(&state.store, keys::INSTANCES, "i-fresh", &fresh).await.unwrap();

        let mut alive = Instance::new("i-alive".into(), "alive".into(), 1, 512, vec![]);
        alive.node = Some("node-a".into());
        repo::put(&state.store, keys::INSTANCES, "i-alive", &alive).await.unwrap();

        reap_instances(&state).await.unwrap();

        let remaining: Vec<Instance> = repo::scan(&state.store, keys::INSTANCES).await.unwrap();
        let mut uuids: Vec<&str> = remaining.iter().map(|i| i.uuid.as_str()).collect();
        uuids.sort();
        assert_eq!(uuids, vec!["i-alive", "i-fresh"]);
    }

    #[tokio::test]
    async fn reap_networks_only_removes_tombstones_past_grace_period() {
        let state = crate::test_support::test_state("node-a", "/tmp/sf-node-test-cleaner-networks").await;

        let mut stale = Network {
            uuid: "n-stale".into(),
            vxlan_id: 1,
            netblock: "10.0.0.0/24".into(),
            provide_dhcp: false,
            provide_nat: false,
            owner: "all".into(),
            name: "stale".into(),
            state: NetworkState::Created,
            floating_gateway: None,
            deleted_at: None,
        };
        stale.mark_deleted();
        stale.deleted_at = Some(Utc::now() - ChronoDuration::from_std(timing::CLEANER_GRACE_PERIOD).unwrap() - ChronoDuration::seconds(1));
        repo::put(&state.store, keys::NETWORKS, "n-stale", &stale).await.unwrap();

        reap_networks(&state).await.unwrap();

        let remaining: Vec<Network> = repo::scan(&state.store, keys::NETWORKS).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn reap_stale_image_versions_keeps_current_and_drops_superseded_after_grace() {
        let root = std::env::temp_dir().join(format!("sf-node-test-cleaner-images-{}", sf_core::model::new_uuid()));
        let image_cache = root.join("image_cache");
        tokio::fs::create_dir_all(&image_cache).await.unwrap();

        let hash = "deadbeef";
        tokio::fs::write(image_cache.join(format!("{hash}.info")), r#"{"version":2}"#).await.unwrap();
        tokio::fs::write(image_cache.join(format!("{hash}.v002")), b"current").await.unwrap();
        tokio::fs::write(image_cache.join(format!("{hash}.v001")), b"superseded").await.unwrap();

        let old_path = image_cache.join(format!("{hash}.v001"));
        let old_time = SystemTime::now() - timing::CLEANER_GRACE_PERIOD - StdDuration::from_secs(60);
        std::fs::File::open(&old_path).unwrap().set_modified(old_time).unwrap();

        let state = crate::test_support::test_state("node-a", &root.display().to_string()).await;

        reap_stale_image_versions(&state).await;

        assert!(tokio::fs::metadata(image_cache.join(format!("{hash}.v002"))).await.is_ok());
        assert!(tokio::fs::metadata(image_cache.join(format!("{hash}.v001"))).await.is_err());

        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
