//! Checkpoint manager: saving and loading positions through a store.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointStorage, FilesystemStore,
};

/// Store used when checkpoint storage is disabled.
///
/// Writes are discarded and reads always report "no checkpoint".
pub struct NullStore;

#[async_trait]
impl CheckpointStore for NullStore {
    async fn store_checkpoint(&self, _contents: String) -> Result<()> {
        Ok(())
    }

    async fn read_checkpoint(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn location(&self) -> Option<String> {
        None
    }
}

/// Manager for saving and loading change-log positions.
///
/// Cloning is cheap; clones share the same store.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointManager, CheckpointStorage};
///
/// let storage = CheckpointStorage::from_path(Some("/var/lib/mysql-sync/position".into()));
/// let manager = CheckpointManager::new(&storage);
///
/// manager.emit_checkpoint(&position).await?;
/// let resumed: Option<BinlogPosition> = manager.load_checkpoint().await;
/// ```
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    /// Create a manager for the configured storage backend.
    pub fn new(storage: &CheckpointStorage) -> Self {
        let store: Arc<dyn CheckpointStore> = match storage {
            CheckpointStorage::Disabled => Arc::new(NullStore),
            CheckpointStorage::Filesystem { path } => Arc::new(FilesystemStore::new(path)),
        };
        Self { store }
    }

    /// Create a manager over an explicit store.
    pub fn with_store(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Where checkpoints go, None when storage is disabled.
    pub fn location(&self) -> Option<String> {
        self.store.location()
    }

    /// Persist a position, replacing the previous checkpoint.
    pub async fn emit_checkpoint<C: Checkpoint>(&self, checkpoint: &C) -> Result<()> {
        let file = CheckpointFile::new(checkpoint)?;
        let contents = serde_json::to_string_pretty(&file)?;
        self.store.store_checkpoint(contents).await?;

        tracing::debug!("Emitted checkpoint: {}", checkpoint.to_cli_string());
        Ok(())
    }

    /// Load the last persisted position.
    ///
    /// A missing, empty, unreadable or malformed checkpoint is logged and
    /// reported as `None`; it never fails startup.
    pub async fn load_checkpoint<C: Checkpoint>(&self) -> Option<C> {
        let location = self.location()?;

        let contents = match self.store.read_checkpoint().await {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                tracing::info!("No checkpoint found at {location}");
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read checkpoint at {location}: {e:#}");
                return None;
            }
        };

        if contents.trim().len() <= 1 {
            tracing::info!("Checkpoint at {location} is empty");
            return None;
        }

        match CheckpointFile::decode::<C>(&contents) {
            Ok(checkpoint) => {
                tracing::info!(
                    "Loaded checkpoint from {location}: {}",
                    checkpoint.to_cli_string()
                );
                Some(checkpoint)
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed checkpoint at {location}: {e:#}");
                None
            }
        }
    }
}
