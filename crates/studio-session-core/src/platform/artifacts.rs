use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::OfflineArtifacts;

/// Directory under the cache root holding one pid file per background worker
const WORKERS_DIR: &str = "workers";

/// Offline databases and workers kept under the host cache directory.
///
/// Every entry of the cache directory except `workers/` counts as a local
/// database. Workers register by dropping a `<name>.pid` file in `workers/`.
pub struct CacheDirArtifacts {
    cache_dir: PathBuf,
}

impl CacheDirArtifacts {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn remove_databases(cache_dir: &Path) -> Result<usize> {
        if !cache_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(cache_dir)
            .with_context(|| format!("Failed to read cache directory {}", cache_dir.display()))?
        {
            let entry = entry?;
            if entry.file_name() == WORKERS_DIR {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!(path = %path.display(), "Removed local database");
            removed += 1;
        }
        Ok(removed)
    }

    fn remove_workers(workers_dir: &Path) -> Result<usize> {
        if !workers_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(workers_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("pid") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to unregister worker {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl OfflineArtifacts for CacheDirArtifacts {
    async fn delete_databases(&self) -> Result<usize> {
        let dir = self.cache_dir.clone();
        tokio::task::spawn_blocking(move || Self::remove_databases(&dir))
            .await
            .context("Database deletion task failed")?
    }

    async fn unregister_workers(&self) -> Result<usize> {
        let dir = self.cache_dir.join(WORKERS_DIR);
        tokio::task::spawn_blocking(move || Self::remove_workers(&dir))
            .await
            .context("Worker unregistration task failed")?
    }
}
