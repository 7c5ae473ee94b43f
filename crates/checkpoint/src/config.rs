//! Checkpoint storage configuration.

use std::path::PathBuf;

/// Where checkpoints are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckpointStorage {
    /// Nothing is persisted; every start is a fresh start.
    #[default]
    Disabled,

    /// A single checkpoint file at `path`.
    Filesystem { path: PathBuf },
}

impl CheckpointStorage {
    /// Filesystem storage when a path is configured, disabled otherwise.
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::Filesystem { path },
            None => Self::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}
