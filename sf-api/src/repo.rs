//! Thin JSON (de)serialization layer over the coordination store. Handlers
//! and the pipeline never touch `CoordinationStore::get/put` directly - they
//! go through these typed helpers, keyed by the prefixes in
//! [`sf_core::config::keys`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sf_core::error::{Error, Result};
use sf_coord::CoordinationStore;

pub async fn get<T: DeserializeOwned>(
    store: &Arc<dyn CoordinationStore>,
    prefix: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(prefix, "", key).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .map_err(|e| Error::Internal(format!("decoding {prefix}/{key}: {e}")))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn put<T: Serialize>(
    store: &Arc<dyn CoordinationStore>,
    prefix: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let encoded = serde_json::to_value(value)
        .map_err(|e| Error::Internal(format!("encoding {prefix}/{key}: {e}")))?;
    store.put(prefix, "", key, encoded).await
}

pub async fn scan<T: DeserializeOwned>(store: &Arc<dyn CoordinationStore>, prefix: &str) -> Result<Vec<T>> {
    let rows = store.prefix_scan(prefix).await?;
    rows.into_iter()
        .map(|(key, value)| {
            serde_json::from_value(value).map_err(|e| Error::Internal(format!("decoding {key}: {e}")))
        })
        .collect()
}

/// Like [`put`], but under a sub-collection (e.g. per-instance event streams
/// at `events/<uuid>/<ts>`).
pub async fn put_nested<T: Serialize>(
    store: &Arc<dyn CoordinationStore>,
    prefix: &str,
    subkey: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let encoded = serde_json::to_value(value)
        .map_err(|e| Error::Internal(format!("encoding {prefix}/{subkey}/{key}: {e}")))?;
    store.put(prefix, subkey, key, encoded).await
}

/// Enumerate everything under `<prefix>/<subkey>/`.
pub async fn scan_nested<T: DeserializeOwned>(
    store: &Arc<dyn CoordinationStore>,
    prefix: &str,
    subkey: &str,
) -> Result<Vec<T>> {
    let full_prefix = format!("{prefix}/{subkey}");
    let rows = store.prefix_scan(&full_prefix).await?;
    rows.into_iter()
        .map(|(key, value)| {
            serde_json::from_value(value).map_err(|e| Error::Internal(format!("decoding {key}: {e}")))
        })
        .collect()
}
