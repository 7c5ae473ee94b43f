//! Replication position checkpoints for mysql-sync
//!
//! Provides storage-agnostic checkpoint file handling for change-log
//! positions, plus the periodic ticker that persists the reader's position
//! while incremental sync runs.
//!
//! # Architecture
//!
//! - The `Checkpoint` trait is implemented by each change-log position type
//! - `CheckpointFile` wraps a position with its type tag for storage
//! - `CheckpointManager` saves and loads positions through a `CheckpointStore`
//! - `CheckpointTicker` samples the current position on a fixed interval
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - a single JSON file, replaced atomically on each write
//! - `NullStore` - used when no checkpoint path is configured

mod config;
mod file;
mod filesystem;
mod manager;
pub mod store;
mod ticker;


pub use config::CheckpointStorage;
pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use manager::{CheckpointManager, NullStore};
pub use store::CheckpointStore;
pub use ticker::{CheckpointTicker, TickerStats, DEFAULT_CHECKPOINT_INTERVAL};

/// Trait that change-log position types must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct LogOffset {
///     pub segment: u32,
///     pub offset: u64,
/// }
///
/// impl Checkpoint for LogOffset {
///     const DATABASE_TYPE: &'static str = "mylog";
///
///     fn to_cli_string(&self) -> String {
///         format!("{}:{}", self.segment, self.offset)
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         let (segment, offset) = s
///             .split_once(':')
///             .ok_or_else(|| anyhow::anyhow!("Invalid checkpoint format"))?;
///         Ok(Self {
///             segment: segment.parse()?,
///             offset: offset.parse()?,
///         })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Position type identifier (e.g., "mysql-binlog").
    ///
    /// Written into every checkpoint file and checked when loading, so a file
    /// left behind by a different source type is never mistaken for ours.
    const DATABASE_TYPE: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    /// It is also the form used in log lines.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
