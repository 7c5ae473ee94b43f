//! Snapshot (initial full sync) from the source to the target.
//!
//! For every mapped table pair, in mapping order:
//!
//! 1. count the rows of the target table; a non-empty target is skipped
//! 2. read the source column names
//! 3. scan the source table through a bounded cursor
//! 4. write rows in batches of `batch_size` as one multi-row INSERT each
//!
//! The snapshot is best effort. A row that fails to scan is skipped, a batch
//! that fails to insert is dropped, and a table whose metadata or scan cannot
//! be opened is abandoned. None of these stop the remaining tables.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use mysql_async::{prelude::Queryable, Pool, Value};
use mysql_sink::{batch_insert_statement, TargetDatabase};
use sync_core::{MappingTable, Row, TablePair, TableRef};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::SyncOpts;

/// Rows of one table scan. An `Err` item is a row that could not be read.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Trait for reading snapshot data from the source.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Column names of `table` in ordinal order.
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>>;

    /// Open a scan over `columns` of `table`.
    async fn scan_rows(&self, table: &TableRef, columns: &[String]) -> Result<RowStream>;
}

/// Snapshot source reading from a MySQL pool.
///
/// Each scan runs on its own connection in a background task and hands rows
/// over through a channel of `buffer` slots, so at most a few batches are in
/// memory regardless of table size.
pub struct MySQLSnapshotSource {
    pool: Pool,
    buffer: usize,
}

impl MySQLSnapshotSource {
    pub fn new(pool: Pool, buffer: usize) -> Self {
        Self {
            pool,
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl SnapshotSource for MySQLSnapshotSource {
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let mut conn = self.pool.get_conn().await?;
        crate::schema::fetch_column_names(&mut conn, table).await
    }

    async fn scan_rows(&self, table: &TableRef, columns: &[String]) -> Result<RowStream> {
        let mut conn = self.pool.get_conn().await?;
        let sql = format!("SELECT {} FROM {table}", columns.join(", "));

        let (tx, rx) = mpsc::channel::<Result<Row>>(self.buffer);
        let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();

        tokio::spawn(async move {
            let mut result = match conn.query_iter(sql).await {
                Ok(result) => {
                    let _ = opened_tx.send(Ok(()));
                    result
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e.into()));
                    return;
                }
            };

            loop {
                match result.next().await {
                    Ok(Some(row)) => {
                        let values: Row = row
                            .unwrap_raw()
                            .into_iter()
                            .map(|v| v.unwrap_or(Value::NULL))
                            .collect();
                        if tx.send(Ok(values)).await.is_err() {
                            // Consumer gone; dropping the result drains the cursor.
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // The cursor is unusable after a protocol error.
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| anyhow!("Snapshot scan task exited before opening the cursor"))??;
        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// What happened to one table during the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// Target already had rows; nothing was written
    Skipped { existing_rows: u64 },
    /// Rows were copied, possibly with dropped batches or rows
    Copied {
        inserted: u64,
        failed_batches: u64,
        skipped_rows: u64,
    },
    /// The table could not be snapshotted at all
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct TableReport {
    pub source: TableRef,
    pub target: TableRef,
    pub outcome: TableOutcome,
}

/// Per-table results of a snapshot run, in mapping order.
#[derive(Debug, Clone, Default)]
pub struct FullSyncReport {
    pub tables: Vec<TableReport>,
}

impl FullSyncReport {
    pub fn outcome(&self, source: &TableRef) -> Option<&TableOutcome> {
        self.tables
            .iter()
            .find(|t| &t.source == source)
            .map(|t| &t.outcome)
    }

    pub fn rows_inserted(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.outcome {
                TableOutcome::Copied { inserted, .. } => inserted,
                _ => 0,
            })
            .sum()
    }
}

/// Run the snapshot for every mapped table pair.
pub async fn run_full_sync<S, T>(
    source: &S,
    target: &T,
    mappings: &MappingTable,
    opts: &SyncOpts,
) -> FullSyncReport
where
    S: SnapshotSource + ?Sized,
    T: TargetDatabase + ?Sized,
{
    info!("Starting snapshot of {} mapped tables", mappings.len());

    let batch_size = opts.batch_size.max(1);
    let mut report = FullSyncReport::default();

    for pair in mappings.pairs() {
        let outcome = snapshot_table(source, target, pair, batch_size).await;
        match &outcome {
            TableOutcome::Skipped { existing_rows } => info!(
                "Skipped {} -> {}: target already has {} rows",
                pair.source, pair.target, existing_rows
            ),
            TableOutcome::Copied {
                inserted,
                failed_batches,
                skipped_rows,
            } => info!(
                "Copied {} -> {}: {} rows inserted, {} batches failed, {} rows skipped",
                pair.source, pair.target, inserted, failed_batches, skipped_rows
            ),
            TableOutcome::Failed { reason } => error!(
                "Snapshot of {} -> {} abandoned: {}",
                pair.source, pair.target, reason
            ),
        }
        report.tables.push(TableReport {
            source: pair.source.clone(),
            target: pair.target.clone(),
            outcome,
        });
    }

    info!(
        "Snapshot completed: {} rows inserted",
        report.rows_inserted()
    );
    report
}

#[derive(Default)]
struct CopyProgress {
    inserted: u64,
    failed_batches: u64,
    skipped_rows: u64,
}

async fn snapshot_table<S, T>(
    source: &S,
    target: &T,
    pair: &TablePair,
    batch_size: usize,
) -> TableOutcome
where
    S: SnapshotSource + ?Sized,
    T: TargetDatabase + ?Sized,
{
    let existing_rows = match target.count_rows(&pair.target).await {
        Ok(n) => n,
        Err(e) => {
            return TableOutcome::Failed {
                reason: format!("failed to count target rows: {e:#}"),
            }
        }
    };
    if existing_rows > 0 {
        return TableOutcome::Skipped { existing_rows };
    }

    let columns = match source.table_columns(&pair.source).await {
        Ok(columns) if !columns.is_empty() => columns,
        Ok(_) => {
            return TableOutcome::Failed {
                reason: "source table has no columns".to_string(),
            }
        }
        Err(e) => {
            return TableOutcome::Failed {
                reason: format!("failed to read source columns: {e:#}"),
            }
        }
    };

    let mut rows = match source.scan_rows(&pair.source, &columns).await {
        Ok(rows) => rows,
        Err(e) => {
            return TableOutcome::Failed {
                reason: format!("failed to query source table: {e:#}"),
            }
        }
    };

    info!("Snapshotting {} -> {}", pair.source, pair.target);

    let mut progress = CopyProgress::default();
    let mut batch: Vec<Row> = Vec::with_capacity(batch_size);

    while let Some(item) = rows.next().await {
        match item {
            Ok(row) => {
                batch.push(row);
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    flush_batch(target, &pair.target, &columns, full, &mut progress).await;
                }
            }
            Err(e) => {
                warn!("Skipping unreadable row of {}: {e:#}", pair.source);
                progress.skipped_rows += 1;
            }
        }
    }
    if !batch.is_empty() {
        flush_batch(target, &pair.target, &columns, batch, &mut progress).await;
    }

    TableOutcome::Copied {
        inserted: progress.inserted,
        failed_batches: progress.failed_batches,
        skipped_rows: progress.skipped_rows,
    }
}

async fn flush_batch<T>(
    target: &T,
    table: &TableRef,
    columns: &[String],
    batch: Vec<Row>,
    progress: &mut CopyProgress,
) where
    T: TargetDatabase + ?Sized,
{
    let size = batch.len() as u64;
    let statement = match batch_insert_statement(table, columns, batch) {
        Ok(Some(statement)) => statement,
        Ok(None) => return,
        Err(e) => {
            error!("Dropping batch of {size} rows for {table}: {e}");
            progress.failed_batches += 1;
            return;
        }
    };

    match target.execute(statement).await {
        Ok(_) => {
            progress.inserted += size;
            debug!("Inserted batch of {size} rows into {table}");
        }
        Err(e) => {
            error!("Failed to insert batch of {size} rows into {table}: {e:#}");
            progress.failed_batches += 1;
        }
    }
}
