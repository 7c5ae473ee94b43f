//! MySQL binlog positions
//!
//! A position is a binlog file name plus a byte offset into that file. It is
//! serialised as `{"Name": ..., "Pos": ...}`, the layout used by existing
//! position files, so those can be resumed from directly.

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in the source binlog.
///
/// Ordering is by file name, then offset. Binlog file names carry a
/// zero-padded sequence number, so lexical order is log order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BinlogPosition {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Pos")]
    pub pos: u64,
}

impl BinlogPosition {
    pub fn new(name: impl Into<String>, pos: u64) -> Self {
        Self {
            name: name.into(),
            pos,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.pos)
    }
}

impl checkpoint::Checkpoint for BinlogPosition {
    const DATABASE_TYPE: &'static str = "mysql-binlog";

    fn to_cli_string(&self) -> String {
        self.to_string()
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        let (name, pos) = s.rsplit_once(':').ok_or_else(|| {
            anyhow::anyhow!("Invalid binlog position '{s}': expected 'file:offset'")
        })?;
        if name.is_empty() {
            anyhow::bail!("Invalid binlog position '{s}': empty file name");
        }
        let pos = pos
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid binlog offset in '{s}': {e}"))?;
        Ok(Self::new(name, pos))
    }
}

/// Get the source's current binlog position.
///
/// Tries `SHOW BINARY LOG STATUS` (MySQL 8.2+) first and falls back to
/// `SHOW MASTER STATUS`.
pub async fn get_current_checkpoint(conn: &mut mysql_async::Conn) -> Result<BinlogPosition> {
    let rows: Vec<Row> = match conn.query("SHOW BINARY LOG STATUS").await {
        Ok(rows) => rows,
        Err(_) => conn
            .query("SHOW MASTER STATUS")
            .await
            .context("Failed to query binlog position")?,
    };

    let row = rows.into_iter().next().ok_or_else(|| {
        anyhow::anyhow!(
            "SHOW MASTER STATUS returned no rows - binary logging may be disabled on the source"
        )
    })?;

    let name: String = row.get(0).unwrap_or_default();
    let pos: u64 = row.get(1).unwrap_or(4);
    if name.is_empty() {
        anyhow::bail!("SHOW MASTER STATUS returned an empty binlog file name");
    }

    Ok(BinlogPosition { name, pos })
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint::{Checkpoint, CheckpointFile, CheckpointManager, CheckpointStorage};
    use tempfile::TempDir;

    #[test]
    fn test_cli_string_roundtrip() {
        let original = BinlogPosition::new("mysql-bin.000003", 1234);

        let cli_string = original.to_cli_string();
        assert_eq!(cli_string, "mysql-bin.000003:1234");

        let decoded = BinlogPosition::from_cli_string(&cli_string).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_invalid_cli_strings() {
        assert!(BinlogPosition::from_cli_string("mysql-bin.000003").is_err());
        assert!(BinlogPosition::from_cli_string(":4").is_err());
        assert!(BinlogPosition::from_cli_string("mysql-bin.000003:-1").is_err());
        assert!(BinlogPosition::from_cli_string("mysql-bin.000003:abc").is_err());
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_string(&BinlogPosition::new("mysql-bin.000001", 4)).unwrap();
        assert_eq!(json, r#"{"Name":"mysql-bin.000001","Pos":4}"#);
    }

    #[test]
    fn test_ordering_follows_log_order() {
        let a = BinlogPosition::new("mysql-bin.000002", 9000);
        let b = BinlogPosition::new("mysql-bin.000003", 4);
        let c = BinlogPosition::new("mysql-bin.000003", 120);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_checkpoint_file_roundtrip() {
        let original = BinlogPosition::new("mysql-bin.000010", 98765);
        let file = CheckpointFile::new(&original).unwrap();
        assert_eq!(file.database_type(), BinlogPosition::DATABASE_TYPE);

        let decoded: BinlogPosition = file.parse().unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage =
            CheckpointStorage::from_path(Some(tmp.path().join("state").join("position.json")));
        let manager = CheckpointManager::new(&storage);

        let original = BinlogPosition::new("mysql-bin.000004", 7711);
        manager.emit_checkpoint(&original).await.unwrap();

        let loaded: Option<BinlogPosition> = manager.load_checkpoint().await;
        assert_eq!(loaded, Some(original));
    }

    #[tokio::test]
    async fn test_loads_bare_position_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("position.json");
        std::fs::write(&path, r#"{"Name":"mysql-bin.000001","Pos":154}"#).unwrap();

        let manager = CheckpointManager::new(&CheckpointStorage::from_path(Some(path)));
        let loaded: Option<BinlogPosition> = manager.load_checkpoint().await;
        assert_eq!(loaded, Some(BinlogPosition::new("mysql-bin.000001", 154)));
    }
}
