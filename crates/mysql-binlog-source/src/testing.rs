//! Test doubles for the snapshot source and the change-log reader.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::{Row, RowChangeEvent, TableRef};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::BinlogPosition;
use crate::full_sync::{RowStream, SnapshotSource};
use crate::source::{ChangeLogReader, EventSink};

// ============================================================================
// MemorySource
// ============================================================================

type ScanHook = Arc<dyn Fn(&TableRef) + Send + Sync>;

#[derive(Default)]
struct SourceState {
    tables: HashMap<TableRef, (Vec<String>, Vec<Result<Row, String>>)>,
    fail_columns: HashSet<TableRef>,
    fail_scan: HashSet<TableRef>,
    on_scan: Option<ScanHook>,
}

/// In-memory snapshot source. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_table(&self, table: TableRef, columns: &[&str], rows: Vec<Row>) {
        self.add_table_items(table, columns, rows.into_iter().map(Ok).collect());
    }

    /// Add a table whose scan yields `items`; an `Err` item is an unreadable row.
    pub fn add_table_items(
        &self,
        table: TableRef,
        columns: &[&str],
        items: Vec<Result<Row, String>>,
    ) {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.state().tables.insert(table, (columns, items));
    }

    pub fn fail_columns(&self, table: TableRef) {
        self.state().fail_columns.insert(table);
    }

    pub fn fail_scan(&self, table: TableRef) {
        self.state().fail_scan.insert(table);
    }

    /// Call `hook` whenever a table scan starts.
    pub fn on_scan(&self, hook: impl Fn(&TableRef) + Send + Sync + 'static) {
        self.state().on_scan = Some(Arc::new(hook));
    }
}

#[async_trait]
impl SnapshotSource for MemorySource {
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let state = self.state();
        if state.fail_columns.contains(table) {
            bail!("Injected column lookup failure for {table}");
        }
        state
            .tables
            .get(table)
            .map(|(columns, _)| columns.clone())
            .ok_or_else(|| anyhow!("Table {table} doesn't exist"))
    }

    async fn scan_rows(&self, table: &TableRef, _columns: &[String]) -> Result<RowStream> {
        let hook = self.state().on_scan.clone();
        if let Some(hook) = hook {
            hook(table);
        }

        let state = self.state();
        if state.fail_scan.contains(table) {
            bail!("Injected scan failure for {table}");
        }
        let items: Vec<Result<Row>> = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table {table} doesn't exist"))?
            .1
            .iter()
            .map(|item| item.clone().map_err(|e| anyhow!(e)))
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

// ============================================================================
// ScriptedReader
// ============================================================================

/// One step of a [`ScriptedReader`] run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a row change to the sink
    Event(RowChangeEvent),
    /// Publish a synced position
    Synced { position: BinlogPosition, force: bool },
    /// Fail the run with this message
    Fail(String),
}

/// What the reader does after the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Block until cancelled, like a live log tail
    WaitForShutdown,
    /// Return immediately, like a log that ended
    Return,
}

#[derive(Debug, Default)]
struct CallLog {
    starts: Vec<Option<BinlogPosition>>,
    sampled: Vec<BinlogPosition>,
}

/// Calls made on a [`ScriptedReader`], shared with the test.
#[derive(Debug, Clone, Default)]
pub struct ReaderCalls(Arc<Mutex<CallLog>>);

impl ReaderCalls {
    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start positions passed to `run`.
    pub fn starts(&self) -> Vec<Option<BinlogPosition>> {
        self.log().starts.clone()
    }

    /// Positions returned by `current_position`.
    pub fn sampled(&self) -> Vec<BinlogPosition> {
        self.log().sampled.clone()
    }
}

/// Head of a scripted log. Tests move it to simulate writes on the source.
#[derive(Debug, Clone)]
pub struct LogHead(Arc<Mutex<BinlogPosition>>);

impl LogHead {
    pub fn get(&self) -> BinlogPosition {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn advance_to(&self, position: BinlogPosition) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = position;
    }
}

/// Change-log reader replaying a fixed script.
pub struct ScriptedReader {
    steps: Vec<ScriptStep>,
    end: ScriptEnd,
    head: LogHead,
    calls: ReaderCalls,
    position_tx: watch::Sender<Option<BinlogPosition>>,
}

impl ScriptedReader {
    pub fn new(steps: Vec<ScriptStep>, end: ScriptEnd) -> Self {
        let (position_tx, _) = watch::channel(None);
        Self {
            steps,
            end,
            head: LogHead(Arc::new(Mutex::new(BinlogPosition::new("mysql-bin.000001", 4)))),
            calls: ReaderCalls::default(),
            position_tx,
        }
    }

    /// Current end of the log, reported by `current_position` and used
    /// when the run is not given a start.
    pub fn with_default_start(self, position: BinlogPosition) -> Self {
        self.head.advance_to(position);
        self
    }

    pub fn head(&self) -> LogHead {
        self.head.clone()
    }

    pub fn calls(&self) -> ReaderCalls {
        self.calls.clone()
    }
}

#[async_trait]
impl ChangeLogReader for ScriptedReader {
    type Position = BinlogPosition;

    fn position(&self) -> watch::Receiver<Option<BinlogPosition>> {
        self.position_tx.subscribe()
    }

    async fn current_position(&mut self) -> Result<BinlogPosition> {
        let position = self.head.get();
        self.calls.log().sampled.push(position.clone());
        Ok(position)
    }

    async fn run(
        &mut self,
        start: Option<BinlogPosition>,
        sink: &mut dyn EventSink<BinlogPosition>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.calls.log().starts.push(start.clone());
        let start = start.unwrap_or_else(|| self.head.get());
        self.position_tx.send_replace(Some(start));

        for step in std::mem::take(&mut self.steps) {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            match step {
                ScriptStep::Event(event) => sink.on_row_change(event).await?,
                ScriptStep::Synced { position, force } => {
                    self.position_tx.send_replace(Some(position.clone()));
                    sink.on_position_synced(&position, force).await?;
                }
                ScriptStep::Fail(message) => bail!(message),
            }
        }

        match self.end {
            ScriptEnd::WaitForShutdown => {
                shutdown.cancelled().await;
                Ok(())
            }
            ScriptEnd::Return => Ok(()),
        }
    }
}
