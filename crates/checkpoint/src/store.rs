//! Checkpoint storage trait.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for checkpoint storage operations.
///
/// A store holds exactly one checkpoint: each write replaces the previous
/// one. Implementations:
/// - Filesystem storage (`FilesystemStore`)
/// - No storage (`NullStore`)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the stored checkpoint with `contents`.
    async fn store_checkpoint(&self, contents: String) -> Result<()>;

    /// Read the stored checkpoint.
    ///
    /// Returns None if no checkpoint has been written yet.
    async fn read_checkpoint(&self) -> Result<Option<String>>;

    /// Human-readable location for log lines, None if nothing is persisted.
    fn location(&self) -> Option<String>;
}
