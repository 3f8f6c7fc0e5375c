//! Node-local, content-addressed image cache (§4.3).
//!
//! Every cached image lives under `image_cache/` inside the node's storage
//! root, keyed by the SHA-256 of its resolved URL. A lock on
//! `sf/images/<node>/<hash>` guards the whole fetch-transcode pipeline so two
//! callers racing on the same image serialize rather than corrupt each
//! other's bytes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sf_core::error::{Error, Result};
use sf_coord::{acquire_lock, CoordinationStore, KeepAliveGroup};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::resolver::ResolverRegistry;
use crate::transcode;

use sf_core::config::timing::{IMAGE_LOCK_REFRESH, IMAGE_LOCK_TTL};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheInfo {
    last_modified: Option<String>,
    content_length: Option<u64>,
    version: u32,
}

pub struct ImageCache {
    root: PathBuf,
    node_name: String,
    store: Arc<dyn CoordinationStore>,
    resolvers: ResolverRegistry,
    client: reqwest::Client,
}

impl ImageCache {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        node_name: String,
        store: Arc<dyn CoordinationStore>,
        resolvers: ResolverRegistry,
    ) -> Self {
        Self {
            root: storage_root.into().join("image_cache"),
            node_name,
            store,
            resolvers,
            client: reqwest::Client::new(),
        }
    }

    fn hash_of(resolved_url: &str) -> String {
        let digest = Sha256::digest(resolved_url.as_bytes());
        hex::encode(digest)
    }

    fn base(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    fn info_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.info"))
    }

    fn versioned_path(&self, hash: &str, version: u32) -> PathBuf {
        self.root.join(format!("{hash}.v{version:03}"))
    }

    fn qcow2_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.qcow2"))
    }

    async fn read_info(&self, hash: &str) -> Option<CacheInfo> {
        let bytes = tokio::fs::read(self.info_path(hash)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn write_info(&self, hash: &str, info: &CacheInfo) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(info)
            .map_err(|e| Error::Internal(format!("serializing image cache info: {e}")))?;
        tokio::fs::write(self.info_path(hash), bytes)
            .await
            .map_err(|e| Error::Internal(format!("writing image cache info: {e}")))
    }

    /// Run the full fetch protocol for `name`, returning the final qcow2
    /// path ready to back an instance disk.
    pub async fn fetch(&self, name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Internal(format!("creating image cache directory: {e}")))?;

        let resolved = self.resolvers.resolve(name);
        let hash = Self::hash_of(&resolved);
        let lock_name = sf_core::config::keys::image_lock(&self.node_name, &hash);

        let lock = acquire_lock(self.store.clone(), &lock_name, IMAGE_LOCK_TTL).await?;
        let keepalive = KeepAliveGroup::start(vec![lock], IMAGE_LOCK_REFRESH);

        let result = self.fetch_locked(&resolved, &hash).await;
        drop(keepalive);
        result
    }

    async fn fetch_locked(&self, resolved_url: &str, hash: &str) -> Result<PathBuf> {
        let existing = self.read_info(hash).await;

        let head = self
            .client
            .head(resolved_url)
            .send()
            .await
            .map_err(|e| Error::FetchFailed(e.to_string()))?;
        let last_modified = head
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = head.content_length();

        let dirty = match &existing {
            Some(info) => info.last_modified != last_modified || info.content_length != content_length,
            None => true,
        };

        let version = if dirty {
            let next_version = existing.as_ref().map(|i| i.version + 1).unwrap_or(1);
            self.download(resolved_url, hash, next_version, last_modified, content_length)
                .await?;
            next_version
        } else {
            existing.expect("dirty=false implies existing info").version
        };

        let payload_path = self.versioned_path(hash, version);
        let payload_path = self.maybe_decompress(&payload_path).await?;
        self.ensure_qcow2(hash, &payload_path, dirty).await
    }

    async fn download(
        &self,
        resolved_url: &str,
        hash: &str,
        version: u32,
        last_modified: Option<String>,
        content_length: Option<u64>,
    ) -> Result<()> {
        let dest = self.versioned_path(hash, version);
        info!(url = resolved_url, version, "fetching image into cache");

        let response = self
            .client
            .get(resolved_url)
            .send()
            .await
            .map_err(|e| Error::FetchFailed(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::FetchFailed(format!(
                "unexpected status {} fetching {resolved_url}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| Error::Internal(format!("creating {dest:?}: {e}")))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::FetchFailed(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::Internal(format!("writing {dest:?}: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| Error::Internal(format!("flushing {dest:?}: {e}")))?;

        self.write_info(
            hash,
            &CacheInfo {
                last_modified,
                content_length,
                version,
            },
        )
        .await?;

        Ok(())
    }

    async fn maybe_decompress(&self, path: &Path) -> Result<PathBuf> {
        let head = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Internal(format!("reading {path:?}: {e}")))?;
        if head.len() < 2 || head[0] != 0x1f || head[1] != 0x8b {
            return Ok(path.to_path_buf());
        }

        let orig = PathBuf::from(format!("{}.orig", path.display()));
        if tokio::fs::metadata(&orig).await.is_ok() {
            return Ok(orig);
        }

        let src = path.to_path_buf();
        let dest = orig.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use flate2::read::GzDecoder;
            use std::fs::File;
            use std::io::copy;
            let input = File::open(&src)?;
            let mut decoder = GzDecoder::new(input);
            let mut output = File::create(&dest)?;
            copy(&mut decoder, &mut output)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(format!("decompress task panicked: {e}")))?
        .map_err(|e| Error::Internal(format!("decompressing {path:?}: {e}")))?;

        Ok(orig)
    }

    /// Produce `<hash>.qcow2`. A dirty re-fetch invalidates any previous
    /// transcode (it would otherwise silently serve stale content through a
    /// path name that carries no version).
    async fn ensure_qcow2(&self, hash: &str, payload_path: &Path, force: bool) -> Result<PathBuf> {
        let qcow2 = self.qcow2_path(hash);

        if force {
            let _ = tokio::fs::remove_file(&qcow2).await;
        }

        if tokio::fs::metadata(&qcow2).await.is_ok() {
            return Ok(qcow2);
        }

        let format = transcode::detected_format(payload_path).await.unwrap_or_else(|e| {
            warn!(error = %e, "qemu-img info failed, assuming raw");
            "raw".to_string()
        });

        if format == "qcow2" {
            tokio::fs::hard_link(payload_path, &qcow2)
                .await
                .or_else(|_| std::fs::hard_link(payload_path, &qcow2))
                .map_err(|e| Error::Internal(format!("hard-linking {payload_path:?}: {e}")))?;
        } else {
            transcode::convert(payload_path, &qcow2, &format, "qcow2").await?;
        }

        Ok(qcow2)
    }

    /// Produce `<path>.<N>G`, resizing only when the declared virtual size
    /// differs from the request (§4.3 "Resize").
    pub async fn resize(&self, path: &Path, size_gb: u64) -> Result<PathBuf> {
        let resized = PathBuf::from(format!("{}.{size_gb}G", path.display()));
        if tokio::fs::metadata(&resized).await.is_ok() {
            return Ok(resized);
        }

        let current_size = transcode::virtual_size_bytes(path).await?;
        let target_size = size_gb * (1u64 << 30);

        if current_size == target_size {
            tokio::fs::hard_link(path, &resized)
                .await
                .map_err(|e| Error::Internal(format!("hard-linking {path:?}: {e}")))?;
        } else {
            tokio::fs::copy(path, &resized)
                .await
                .map_err(|e| Error::Internal(format!("copying {path:?}: {e}")))?;
            transcode::resize_in_place(&resized, size_gb).await?;
        }

        Ok(resized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_sha256_of_resolved_url() {
        let hash = ImageCache::hash_of("https://example.com/focal.qcow2");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, ImageCache::hash_of("https://example.com/focal.qcow2"));
        assert_ne!(hash, ImageCache::hash_of("https://example.com/jammy.qcow2"));
    }
}
