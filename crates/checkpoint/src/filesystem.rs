//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::store::CheckpointStore;

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores the checkpoint as a single file. Writes go to a sibling temporary
/// file that is then renamed over the checkpoint, so an interrupted write
/// leaves the previous checkpoint intact.
pub struct FilesystemStore {
    path: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("checkpoint"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create checkpoint directory {}", parent.display())
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, contents: String) -> Result<()> {
        self.ensure_parent_dir().await?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        tracing::debug!("Stored checkpoint to {}", self.path.display());
        Ok(())
    }

    async fn read_checkpoint(&self) -> Result<Option<String>> {
        self.ensure_parent_dir().await?;

        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        }
    }

    fn location(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}
