use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{CacheKey, ContentCache};
use crate::error::{Error, Result};

/// Disk-based cache: one file per key inside a scratch directory.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();

        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::CacheInit(format!(
                "Failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        debug!("Opened disk cache at {}", dir.display());

        Ok(Self { dir })
    }

    /// Location of `key` in the scratch directory, whether or not it exists yet.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }
}

#[async_trait]
impl ContentCache for DiskCache {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Cache read error for {}: {}", key, e);
                None
            }
        }
    }

    async fn put(&self, key: &CacheKey, value: Bytes) -> Result<Option<PathBuf>> {
        let path = self.path_for(key);

        // Write to a sibling temp file and rename so readers never see a partial entry
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &value)
            .await
            .map_err(|e| Error::CacheWrite(format!("{}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::CacheWrite(format!("{}: {e}", path.display())));
        }

        Ok(Some(path))
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheWrite(e.to_string())),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::CacheWrite(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::CacheWrite(e.to_string()))?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_file()) {
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| Error::CacheWrite(e.to_string()))?;
            }
        }

        Ok(())
    }
}
