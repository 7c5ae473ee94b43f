//! MySQL change-log reader based on the binlog replication protocol
//!
//! The reader registers with the source as a replica, decodes row events and
//! hands each changed row to an [`EventSink`] before pulling the next event.
//! Protocol framing and row image decoding are done by `mysql_async` and
//! `mysql_common`; this module maps decoded events onto mapped tables.
//!
//! ## Positions
//!
//! The synced position is published through a `watch` channel after events
//! that end a unit of work: transaction commits (XID), DDL and other
//! non-`BEGIN` query events, and log rotations. It is never published between
//! the rows events of one transaction, so resuming from a published position
//! never starts in the middle of a transaction.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use checkpoint::Checkpoint;
use futures::StreamExt;
use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, BinlogStreamRequest, Pool, Value};
use mysql_common::binlog::events::{EventData, RowsEventData};
use mysql_common::binlog::row::BinlogRow;
use mysql_common::binlog::value::BinlogValue;
use std::sync::Arc;
use sync_core::{ColumnSet, MappingTable, Row, RowChange, RowChangeEvent, TableRef};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{get_current_checkpoint, BinlogPosition};
use crate::schema::{fetch_column_set, TableSchemaCache};
use crate::BinlogOpts;

// ============================================================================
// Traits for change-log consumption
// ============================================================================

/// Receiver of decoded change-log events.
///
/// The reader awaits each call before reading further, so a sink sees events
/// strictly in log order and never concurrently.
#[async_trait]
pub trait EventSink<P: Send + Sync>: Send {
    /// One changed row.
    async fn on_row_change(&mut self, event: RowChangeEvent) -> Result<()>;

    /// The reader reached `position`. `force` marks positions after DDL or
    /// log rotation.
    async fn on_position_synced(&mut self, position: &P, force: bool) -> Result<()>;
}

/// A source of row change events with resumable positions.
#[async_trait]
pub trait ChangeLogReader: Send {
    type Position: Checkpoint + std::fmt::Debug + Send + Sync + 'static;

    /// Receiver for the latest synced position, `None` until the reader has
    /// resolved where it starts.
    fn position(&self) -> watch::Receiver<Option<Self::Position>>;

    /// Current end of the change log.
    ///
    /// Sampled before a snapshot so that changes committed while tables are
    /// copied are replayed afterwards.
    async fn current_position(&mut self) -> Result<Self::Position>;

    /// Read events until `shutdown` is cancelled.
    ///
    /// Starts at `start`, or at the reader's default position when `None`.
    /// Returns `Ok(())` only after cancellation; any other return is an
    /// error or an unexpected end of the log.
    async fn run(
        &mut self,
        start: Option<Self::Position>,
        sink: &mut dyn EventSink<Self::Position>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

// ============================================================================
// MySQL binlog reader
// ============================================================================

/// Binlog reader following the mapped source tables.
pub struct MySQLBinlogReader {
    pool: Pool,
    server_id: u32,
    mappings: Arc<MappingTable>,
    schemas: TableSchemaCache,
    position_tx: watch::Sender<Option<BinlogPosition>>,
}

impl MySQLBinlogReader {
    /// Check that the source can serve row events and build the reader.
    ///
    /// Fails when binary logging is off or `binlog_format` is not `ROW`.
    pub async fn connect(
        pool: Pool,
        mappings: Arc<MappingTable>,
        opts: &BinlogOpts,
    ) -> Result<Self> {
        let mut conn = pool
            .get_conn()
            .await
            .context("Failed to connect to the source for binlog replication")?;

        let format: Option<(String, String)> = conn
            .query_first("SHOW VARIABLES LIKE 'binlog_format'")
            .await?;
        match format {
            Some((_, value)) if value.eq_ignore_ascii_case("ROW") => {}
            Some((_, value)) => {
                bail!("Source binlog_format is {value}; row-based replication requires ROW")
            }
            None => bail!("Binary logging is not enabled on the source"),
        }

        let image: Option<(String, String)> = conn
            .query_first("SHOW VARIABLES LIKE 'binlog_row_image'")
            .await?;
        if let Some((_, value)) = image {
            if !value.eq_ignore_ascii_case("FULL") {
                warn!(
                    "Source binlog_row_image is {value}; rows without a full image will be rejected"
                );
            }
        }

        // Random ID between 1M-2M unless configured
        let server_id = opts
            .server_id
            .unwrap_or_else(|| rand::random::<u32>() % 1_000_000 + 1_000_000);

        let (position_tx, _) = watch::channel(None);
        info!(
            "Binlog reader ready (server id {server_id}, {} mapped tables)",
            mappings.len()
        );

        Ok(Self {
            pool,
            server_id,
            mappings,
            schemas: TableSchemaCache::new(),
            position_tx,
        })
    }

    pub fn server_id(&self) -> u32 {
        self.server_id
    }

    fn publish(&self, position: &BinlogPosition) {
        self.position_tx.send_replace(Some(position.clone()));
    }

    /// Column set for a table map, refreshed when the column count changed.
    async fn column_set(&mut self, table: &TableRef, column_count: usize) -> Result<Arc<ColumnSet>> {
        if let Some(columns) = self.schemas.get(table, column_count) {
            return Ok(columns);
        }

        let mut conn = self.pool.get_conn().await?;
        let columns = fetch_column_set(&mut conn, table).await?;
        if columns.len() != column_count {
            self.schemas.invalidate(table);
            bail!(
                "Schema of {table} has {} columns but the binlog row has {column_count}",
                columns.len()
            );
        }
        debug!("Loaded column layout of {table}");
        Ok(self.schemas.insert(table.clone(), columns))
    }

    /// Decode a rows event of a mapped table. Runs without awaiting so that
    /// no borrow of the stream is held across a suspension point.
    fn decode_rows(
        &self,
        stream: &BinlogStream,
        rows: &RowsEventData<'_>,
    ) -> Result<Option<DecodedRows>> {
        let table_id = rows.table_id();
        let tme = stream
            .get_tme(table_id)
            .ok_or_else(|| anyhow!("Rows event for unknown table id {table_id}"))?;

        let table = TableRef::new(tme.database_name(), tme.table_name());
        if self
            .mappings
            .resolve(&table.database, &table.table)
            .is_none()
        {
            return Ok(None);
        }

        let column_count = tme.columns_count() as usize;
        let changes = rows
            .rows(tme)
            .map(|decoded| {
                let (before, after) = decoded.context("Failed to decode row image")?;
                row_change(before.map(take_values), after.map(take_values), column_count)
            })
            .collect();
        Ok(Some(DecodedRows {
            table,
            column_count,
            changes,
        }))
    }

    async fn deliver(
        &mut self,
        decoded: DecodedRows,
        sink: &mut dyn EventSink<BinlogPosition>,
    ) -> Result<()> {
        let DecodedRows {
            table,
            column_count,
            changes,
        } = decoded;

        let columns = match self.column_set(&table, column_count).await {
            Ok(columns) => columns,
            Err(e) => {
                warn!("Skipping rows event for {table}: {e:#}");
                return Ok(());
            }
        };

        for (index, change) in changes.into_iter().enumerate() {
            match change {
                Ok(change) => {
                    let event = RowChangeEvent::new(table.clone(), columns.clone(), change);
                    sink.on_row_change(event).await?;
                }
                Err(e) => warn!("Skipping row {index} of rows event for {table}: {e:#}"),
            }
        }
        Ok(())
    }
}

struct DecodedRows {
    table: TableRef,
    column_count: usize,
    changes: Vec<Result<RowChange>>,
}

#[async_trait]
impl ChangeLogReader for MySQLBinlogReader {
    type Position = BinlogPosition;

    fn position(&self) -> watch::Receiver<Option<BinlogPosition>> {
        self.position_tx.subscribe()
    }

    async fn current_position(&mut self) -> Result<BinlogPosition> {
        let mut conn = self.pool.get_conn().await?;
        get_current_checkpoint(&mut conn).await
    }

    async fn run(
        &mut self,
        start: Option<BinlogPosition>,
        sink: &mut dyn EventSink<BinlogPosition>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut current = match start {
            Some(position) => position,
            None => {
                let position = self.current_position().await?;
                info!("No resume position, starting at the current binlog position");
                position
            }
        };
        self.publish(&current);

        let conn = self.pool.get_conn().await?;
        let request = BinlogStreamRequest::new(self.server_id)
            .with_filename(current.name.as_bytes())
            .with_pos(current.pos);
        let mut stream = conn
            .get_binlog_stream(request)
            .await
            .with_context(|| format!("Failed to start binlog stream at {current}"))?;

        info!("Streaming binlog from {current}");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Binlog reader stopped at {current}");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Err(anyhow!(e).context("Binlog stream failed")),
                    None => bail!("Binlog stream ended unexpectedly at {current}"),
                },
            };

            let log_pos = u64::from(event.header().log_pos());
            let data = match event.read_data() {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => return Err(anyhow!(e).context("Failed to decode binlog event")),
            };

            let mut decoded = None;
            let boundary = match data {
                EventData::RotateEvent(rotate) => {
                    Boundary::Rotate(BinlogPosition::new(rotate.name(), rotate.position()))
                }
                EventData::RowsEvent(rows) => {
                    decoded = self.decode_rows(&stream, &rows)?;
                    Boundary::Within
                }
                EventData::XidEvent(_) => Boundary::Commit,
                EventData::QueryEvent(query) => query_boundary(&query.query()),
                _ => Boundary::Within,
            };

            let synced = settle(&mut current, log_pos, boundary);
            if let Some(decoded) = decoded {
                self.deliver(decoded, sink).await?;
            }
            if let Some(force) = synced {
                self.publish(&current);
                sink.on_position_synced(&current, force).await?;
            }
        }
    }
}

/// Where an event sits relative to units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    /// Inside a transaction, or not a unit boundary at all
    Within,
    /// Transaction commit
    Commit,
    /// DDL or another statement logged outside a transaction
    Statement,
    /// Switch to the next binlog file
    Rotate(BinlogPosition),
}

fn query_boundary(query: &str) -> Boundary {
    if query.trim().eq_ignore_ascii_case("BEGIN") {
        Boundary::Within
    } else {
        Boundary::Statement
    }
}

/// Move `current` past an event ending at `log_pos`.
///
/// Returns `Some(force)` when `current` is now a synced position.
fn settle(current: &mut BinlogPosition, log_pos: u64, boundary: Boundary) -> Option<bool> {
    let synced = match &boundary {
        Boundary::Within => None,
        Boundary::Commit => Some(false),
        Boundary::Statement | Boundary::Rotate(_) => Some(true),
    };
    match boundary {
        Boundary::Rotate(next) => *current = next,
        // Artificial events carry a zero end position and do not move the reader
        _ if log_pos > 0 => current.pos = log_pos,
        _ => {}
    }
    synced
}

type RowImage = Vec<Option<BinlogValue<'static>>>;

fn take_values(mut row: BinlogRow) -> RowImage {
    (0..row.len())
        .map(|i| row.take(i).map(BinlogValue::into_owned))
        .collect()
}

fn row_change(
    before: Option<RowImage>,
    after: Option<RowImage>,
    expected: usize,
) -> Result<RowChange> {
    match (before, after) {
        (None, Some(after)) => Ok(RowChange::Insert(row_values(after, expected)?)),
        (Some(before), Some(after)) => Ok(RowChange::Update {
            before: row_values(before, expected)?,
            after: row_values(after, expected)?,
        }),
        (Some(before), None) => Ok(RowChange::Delete(row_values(before, expected)?)),
        (None, None) => bail!("Row event without before or after image"),
    }
}

fn row_values(image: RowImage, expected: usize) -> Result<Row> {
    if image.len() != expected {
        bail!(
            "Partial row image with {} of {expected} columns",
            image.len()
        );
    }
    image
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Some(BinlogValue::Value(value)) => Ok(value),
            Some(_) => bail!("Column {i} holds a JSON binlog value, which is not supported"),
            None => Ok(Value::NULL),
        })
        .collect()
}
