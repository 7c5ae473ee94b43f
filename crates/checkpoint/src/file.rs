//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Checkpoint;

/// Storage-agnostic checkpoint file wrapper.
///
/// # File Format
///
/// ```json
/// {
///     "database_type": "mysql-binlog",
///     "checkpoint": {
///         "Name": "mysql-bin.000003",
///         "Pos": 1234
///     },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Position type identifier (e.g., "mysql-binlog")
    pub database_type: String,
    /// Serialized position as JSON Value
    pub checkpoint: serde_json::Value,
    /// Timestamp when this checkpoint file was created
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Create new checkpoint file from a position.
    pub fn new<C: Checkpoint>(checkpoint: &C) -> anyhow::Result<Self> {
        Ok(Self {
            database_type: C::DATABASE_TYPE.to_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Parse checkpoint into the position type `C`.
    ///
    /// Fails if the stored `database_type` is not `C::DATABASE_TYPE` or the
    /// data does not deserialize into `C`.
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.database_type != C::DATABASE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::DATABASE_TYPE,
                self.database_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    /// Decode file contents into a position.
    ///
    /// Accepts the envelope written by [`CheckpointFile::new`] as well as a
    /// bare serialized position, the format older position files use.
    pub fn decode<C: Checkpoint>(contents: &str) -> anyhow::Result<C> {
        match serde_json::from_str::<CheckpointFile>(contents) {
            Ok(file) => file.parse(),
            Err(envelope_err) => serde_json::from_str::<C>(contents).map_err(|bare_err| {
                anyhow::anyhow!(
                    "Checkpoint is neither a checkpoint file ({envelope_err}) nor a bare position ({bare_err})"
                )
            }),
        }
    }

    /// Get the database type of this checkpoint file.
    pub fn database_type(&self) -> &str {
        &self.database_type
    }

    /// Get the timestamp when this checkpoint file was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
