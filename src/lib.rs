//! mysql-sync library
//!
//! Continuous replication from a source MySQL/MariaDB server to a target
//! MySQL/MariaDB server.
//!
//! # Features
//!
//! - Snapshot: copies every mapped table whose target is still empty
//! - Incremental sync: follows the source binlog and applies each row change
//! - Checkpointing: the binlog position is persisted periodically, so a
//!   restart resumes where the last checkpoint left off (at-least-once)
//!
//! # Crates
//!
//! - `sync_core` - mappings, column sets, change events, connection strings
//! - `checkpoint` - checkpoint files and the periodic ticker
//! - `mysql_sink` - target statements and the `TargetDatabase` trait
//! - `sync_mysql_binlog_source` - snapshot engine, dispatcher, binlog reader
//!
//! # CLI Usage
//!
//! ```bash
//! # Snapshot, then follow the binlog until interrupted
//! mysql-sync run --config mysql-sync.yaml
//!
//! # Snapshot only
//! mysql-sync snapshot --config mysql-sync.yaml --batch-size 500
//!
//! # Inspect or set the resume position
//! mysql-sync checkpoint show --position-path /var/lib/mysql-sync/position.json
//! mysql-sync checkpoint set --position-path /var/lib/mysql-sync/position.json mysql-bin.000003:4
//! ```

pub mod config;
pub mod replicate;
pub mod shutdown;

pub use config::{Config, ConfigOverrides, ReplicationSettings};
pub use replicate::{ReplicateOpts, ReplicationState, ReplicationSummary, Replicator};
