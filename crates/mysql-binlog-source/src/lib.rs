//! MySQL binlog-based replication source for mysql-sync
//!
//! Copies mapped tables once (snapshot) and then follows the source binlog,
//! turning each decoded row event into one write against the target.
//! Requires `binlog_format = ROW` on the source.

pub mod checkpoint;
mod full_sync;
mod incremental_sync;
mod schema;
mod source;
pub mod testing;

pub use checkpoint::{get_current_checkpoint, BinlogPosition};
pub use full_sync::{
    run_full_sync, FullSyncReport, MySQLSnapshotSource, RowStream, SnapshotSource, TableOutcome,
    TableReport,
};
pub use incremental_sync::{ChangeDispatcher, DispatchOutcome, DispatchStats};
pub use schema::{fetch_column_names, fetch_column_set, TableSchemaCache};
pub use source::{ChangeLogReader, EventSink, MySQLBinlogReader};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Snapshot options
#[derive(Clone, Debug)]
pub struct SyncOpts {
    /// Rows per multi-row INSERT during the snapshot
    pub batch_size: usize,
}

impl Default for SyncOpts {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Binlog connection options
#[derive(Clone, Debug, Default)]
pub struct BinlogOpts {
    /// Replica server id presented to the source; random when unset
    pub server_id: Option<u32>,
}
