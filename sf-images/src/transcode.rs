//! Wraps the external `qemu-img` tool for format probing, conversion and
//! resize - the control plane never links a virtualization library
//! directly, it shells out the same way mvirt-zfs does for its own
//! qcow2 imports.

use std::path::Path;

use serde_json::Value;
use sf_core::error::{Error, Result};
use tokio::process::Command;

pub async fn probe(path: &Path) -> Result<Value> {
    let output = Command::new("qemu-img")
        .args(["info", "--output=json"])
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::ExternalToolFailed(format!("qemu-img info: {e}")))?;

    if !output.status.success() {
        return Err(Error::ExternalToolFailed(format!(
            "qemu-img info failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::ExternalToolFailed(format!("parsing qemu-img info output: {e}")))
}

pub async fn virtual_size_bytes(path: &Path) -> Result<u64> {
    let info = probe(path).await?;
    info["virtual-size"]
        .as_u64()
        .ok_or_else(|| Error::ExternalToolFailed("qemu-img info missing virtual-size".into()))
}

pub async fn detected_format(path: &Path) -> Result<String> {
    let info = probe(path).await?;
    Ok(info["format"].as_str().unwrap_or("raw").to_string())
}

pub async fn convert(src: &Path, dest: &Path, src_format: &str, dest_format: &str) -> Result<()> {
    let output = Command::new("qemu-img")
        .args(["convert", "-f", src_format, "-O", dest_format, "-p"])
        .arg(src)
        .arg(dest)
        .output()
        .await
        .map_err(|e| Error::ExternalToolFailed(format!("qemu-img convert: {e}")))?;

    if !output.status.success() {
        return Err(Error::ExternalToolFailed(format!(
            "qemu-img convert failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub async fn create_cow(dest: &Path, backing_file: &Path) -> Result<()> {
    let output = Command::new("qemu-img")
        .args(["create", "-f", "qcow2", "-F", "qcow2", "-b"])
        .arg(backing_file)
        .arg(dest)
        .output()
        .await
        .map_err(|e| Error::ExternalToolFailed(format!("qemu-img create: {e}")))?;

    if !output.status.success() {
        return Err(Error::ExternalToolFailed(format!(
            "qemu-img create (COW) failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub async fn create_blank(dest: &Path, size_gb: u64) -> Result<()> {
    let output = Command::new("qemu-img")
        .args(["create", "-f", "qcow2"])
        .arg(dest)
        .arg(format!("{size_gb}G"))
        .output()
        .await
        .map_err(|e| Error::ExternalToolFailed(format!("qemu-img create: {e}")))?;

    if !output.status.success() {
        return Err(Error::ExternalToolFailed(format!(
            "qemu-img create (blank) failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

pub async fn resize_in_place(path: &Path, size_gb: u64) -> Result<()> {
    let output = Command::new("qemu-img")
        .args(["resize"])
        .arg(path)
        .arg(format!("{size_gb}G"))
        .output()
        .await
        .map_err(|e| Error::ExternalToolFailed(format!("qemu-img resize: {e}")))?;

    if !output.status.success() {
        return Err(Error::ExternalToolFailed(format!(
            "qemu-img resize failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
