//! Disk quota accounting for sandboxed plugins' data directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// Walks a plugin's data directory to enforce its disk quota.
pub struct DiskWatcher {
    data_dir: PathBuf,
    max_mb: u64,
}

impl DiskWatcher {
    pub fn new(data_dir: PathBuf, max_mb: u64) -> Self {
        Self { data_dir, max_mb }
    }

    /// Computes current usage. Unlimited (`max_mb == 0`) watchers skip the walk.
    pub async fn usage_mb(&self) -> HostResult<u64> {
        if self.max_mb == 0 {
            return Ok(0);
        }
        let dir = self.data_dir.clone();
        let bytes = tokio::task::spawn_blocking(move || walk_size(&dir))
            .await
            .map_err(|e| HostError::Other(format!("disk usage walk panicked: {}", e)))??;
        Ok(bytes / (1024 * 1024))
    }

    /// Fails if `used_mb + estimated_mb` would exceed the quota.
    pub async fn check_write(&self, estimated_mb: u64) -> HostResult<()> {
        if self.max_mb == 0 {
            return Ok(());
        }
        let used = self.usage_mb().await?;
        if used + estimated_mb > self.max_mb {
            return Err(HostError::DiskQuotaExceeded {
                id: self.data_dir.display().to_string(),
                used_mb: used + estimated_mb,
                max_mb: self.max_mb,
            });
        }
        Ok(())
    }

    pub async fn stats(&self) -> HostResult<DiskStats> {
        let used_mb = self.usage_mb().await?;
        let percent = if self.max_mb == 0 {
            0.0
        } else {
            (used_mb as f64 / self.max_mb as f64) * 100.0
        };
        Ok(DiskStats {
            used_mb,
            max_mb: self.max_mb,
            percent,
            ok: self.max_mb == 0 || used_mb <= self.max_mb,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStats {
    pub used_mb: u64,
    pub max_mb: u64,
    pub percent: f64,
    pub ok: bool,
}

fn walk_size(dir: &Path) -> HostResult<u64> {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_dir() {
                    stack.push(path);
                } else {
                    total += metadata.len();
                }
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_directory_reports_zero_usage() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = DiskWatcher::new(dir.path().to_path_buf(), 10);
        assert_eq!(watcher.usage_mb().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unlimited_watcher_never_blocks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 1024]).unwrap();
        let watcher = DiskWatcher::new(dir.path().to_path_buf(), 0);
        assert!(watcher.check_write(1_000_000).await.is_ok());
    }

    #[tokio::test]
    async fn write_exceeding_quota_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = DiskWatcher::new(dir.path().to_path_buf(), 1);
        let result = watcher.check_write(2).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stats_reports_percent_used() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = DiskWatcher::new(dir.path().to_path_buf(), 10);
        let stats = watcher.stats().await.unwrap();
        assert_eq!(stats.used_mb, 0);
        assert!(stats.ok);
    }
}
