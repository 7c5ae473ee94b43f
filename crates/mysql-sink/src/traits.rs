//! TargetDatabase trait definition.

use anyhow::Result;
use sync_core::TableRef;

use crate::Statement;

/// Trait for writing to the replication target.
///
/// Source-side code is generic over this trait so that the same snapshot and
/// dispatch logic runs against a live MySQL server or an in-memory fake:
///
/// ```ignore
/// pub async fn run_full_sync<S: SnapshotSource, T: TargetDatabase>(
///     source: &S,
///     target: &T,
///     ...
/// ) -> FullSyncReport
/// ```
#[async_trait::async_trait]
pub trait TargetDatabase: Send + Sync {
    /// Number of rows currently in `table`.
    async fn count_rows(&self, table: &TableRef) -> Result<u64>;

    /// Execute one statement and return the number of affected rows.
    ///
    /// Statements are executed exactly once; there is no retry.
    async fn execute(&self, statement: Statement) -> Result<u64>;
}
