//! Per-instance disk derivation from a cached image (§4.3 "COW/flat/raw
//! derivation"). All three modes are idempotent: an existing destination is
//! returned without redoing the work.

use std::path::{Path, PathBuf};

use sf_core::error::{Error, Result};

use crate::transcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskDerivation {
    Cow,
    Flat,
    Raw,
}

pub async fn derive_disk(
    cache_path: &Path,
    dest: &Path,
    mode: DiskDerivation,
) -> Result<PathBuf> {
    if tokio::fs::metadata(dest).await.is_ok() {
        return Ok(dest.to_path_buf());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Internal(format!("creating disk directory {parent:?}: {e}")))?;
    }

    match mode {
        DiskDerivation::Cow => transcode::create_cow(dest, cache_path).await?,
        DiskDerivation::Flat => {
            tokio::fs::copy(cache_path, dest)
                .await
                .map_err(|e| Error::Internal(format!("copying {cache_path:?} to {dest:?}: {e}")))?;
        }
        DiskDerivation::Raw => {
            let src_format = transcode::detected_format(cache_path).await?;
            transcode::convert(cache_path, dest, &src_format, "raw").await?;
        }
    }

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flat_derivation_is_idempotent_once_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("src.img");
        tokio::fs::write(&cache_path, b"payload").await.unwrap();
        let dest = dir.path().join("instance.img");

        derive_disk(&cache_path, &dest, DiskDerivation::Flat).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");

        // Overwrite the source; a second derive must not touch an existing dest.
        tokio::fs::write(&cache_path, b"changed").await.unwrap();
        derive_disk(&cache_path, &dest, DiskDerivation::Flat).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"payload");
    }
}
