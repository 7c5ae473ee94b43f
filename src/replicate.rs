//! Replication orchestrator.
//!
//! A run moves through `Init → SnapshotPhase → IncrementalPhase → Stopped`:
//!
//! - before the snapshot, the start position is fixed: the last checkpoint,
//!   or the current end of the change log when there is none
//! - the snapshot copies every mapped table whose target is empty and always
//!   proceeds, whatever happened to individual tables
//! - the incremental phase runs the change-log reader from that position
//!   with the dispatcher as its sink, and runs the checkpoint ticker as a
//!   separate task
//! - both incremental tasks stop on the shared cancellation token
//!
//! No checkpoint is written on shutdown. The last periodic tick is the
//! recovery point, so a restart replays everything after it.

use anyhow::{anyhow, Result};
use checkpoint::{Checkpoint, CheckpointManager, CheckpointStorage, CheckpointTicker, TickerStats};
use mysql_sink::TargetDatabase;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use sync_core::MappingTable;
use sync_mysql_binlog_source::{
    run_full_sync, ChangeDispatcher, ChangeLogReader, DispatchStats, FullSyncReport,
    SnapshotSource, SyncOpts,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Lifecycle of a [`Replicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    Init,
    SnapshotPhase,
    IncrementalPhase,
    Stopped,
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicationState::Init => "init",
            ReplicationState::SnapshotPhase => "snapshot",
            ReplicationState::IncrementalPhase => "incremental",
            ReplicationState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReplicateOpts {
    pub sync: SyncOpts,
    pub checkpoint_storage: CheckpointStorage,
    /// Zero selects the default interval
    pub checkpoint_interval: Duration,
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct ReplicationSummary {
    pub snapshot: FullSyncReport,
    /// Checkpoint the reader resumed from, in CLI form
    pub resumed_from: Option<String>,
    pub dispatch: DispatchStats,
    pub checkpoints: TickerStats,
}

/// Owns the source, target and reader of one replication run.
pub struct Replicator<S, T, R> {
    source: S,
    target: T,
    reader: R,
    mappings: Arc<MappingTable>,
    opts: ReplicateOpts,
    checkpoints: CheckpointManager,
    state: watch::Sender<ReplicationState>,
}

impl<S, T> Replicator<S, T, ()>
where
    S: SnapshotSource,
    T: TargetDatabase,
{
    /// Replicator without a change-log reader, for snapshot-only runs.
    pub fn snapshot_only(
        source: S,
        target: T,
        mappings: Arc<MappingTable>,
        opts: ReplicateOpts,
    ) -> Self {
        Self::new(source, target, (), mappings, opts)
    }
}

impl<S, T, R> Replicator<S, T, R>
where
    S: SnapshotSource,
    T: TargetDatabase,
{
    pub fn new(
        source: S,
        target: T,
        reader: R,
        mappings: Arc<MappingTable>,
        opts: ReplicateOpts,
    ) -> Self {
        let checkpoints = CheckpointManager::new(&opts.checkpoint_storage);
        let (state, _) = watch::channel(ReplicationState::Init);
        Self {
            source,
            target,
            reader,
            mappings,
            opts,
            checkpoints,
            state,
        }
    }

    pub fn state(&self) -> ReplicationState {
        *self.state.borrow()
    }

    /// Receiver following state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ReplicationState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ReplicationState) {
        let previous = self.state.send_replace(next);
        info!("Replication state: {previous} -> {next}");
    }

    /// Run only the snapshot phase.
    pub async fn run_snapshot(&self) -> FullSyncReport {
        self.transition(ReplicationState::SnapshotPhase);
        let report = run_full_sync(&self.source, &self.target, &self.mappings, &self.opts.sync).await;
        self.transition(ReplicationState::Stopped);
        report
    }
}

impl<S, T, R> Replicator<S, T, R>
where
    S: SnapshotSource,
    T: TargetDatabase,
    R: ChangeLogReader,
{
    /// Snapshot, then replicate changes until `shutdown` is cancelled.
    ///
    /// Returns an error when the start position cannot be determined, when
    /// the reader fails or stops without being cancelled, or when the
    /// checkpoint ticker dies.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ReplicationSummary> {
        let stored: Option<R::Position> = self.checkpoints.load_checkpoint().await;
        let resumed_from = stored.as_ref().map(|p| p.to_cli_string());
        let start = match stored {
            Some(position) => {
                info!("Resuming incremental sync from {}", position.to_cli_string());
                position
            }
            None => match self.reader.current_position().await {
                Ok(position) => {
                    info!(
                        "No checkpoint, incremental sync will start at {}",
                        position.to_cli_string()
                    );
                    position
                }
                Err(e) => {
                    self.transition(ReplicationState::Stopped);
                    return Err(e.context("Failed to read the current change log position"));
                }
            },
        };

        self.transition(ReplicationState::SnapshotPhase);
        let snapshot =
            run_full_sync(&self.source, &self.target, &self.mappings, &self.opts.sync).await;

        if shutdown.is_cancelled() {
            info!("Shutdown requested during snapshot, skipping incremental sync");
            self.transition(ReplicationState::Stopped);
            return Ok(ReplicationSummary {
                snapshot,
                resumed_from: None,
                dispatch: DispatchStats::default(),
                checkpoints: TickerStats::default(),
            });
        }

        self.transition(ReplicationState::IncrementalPhase);

        let incremental = shutdown.child_token();
        let ticker_token = incremental.child_token();
        let ticker = CheckpointTicker::new(
            self.checkpoints.clone(),
            self.reader.position(),
            self.opts.checkpoint_interval,
        );
        let mut ticker_handle = tokio::spawn(ticker.run(ticker_token.clone()));

        let mut dispatcher = ChangeDispatcher::new(self.target, self.mappings.clone());
        let (reader_result, ticker_result) = {
            let reader = self
                .reader
                .run(Some(start), &mut dispatcher, incremental.clone());
            tokio::pin!(reader);

            tokio::select! {
                result = &mut reader => {
                    ticker_token.cancel();
                    (result, ticker_handle.await)
                }
                // The ticker only finishes on its own when it panicked.
                joined = &mut ticker_handle => {
                    error!("Checkpoint ticker stopped unexpectedly, stopping the reader");
                    incremental.cancel();
                    (reader.await, joined)
                }
            }
        };
        let dispatch = dispatcher.stats();

        let state = self.state;
        let previous = state.send_replace(ReplicationState::Stopped);
        info!(
            "Replication state: {previous} -> {}: {} events applied, {} unmapped, {} rejected, {} failed",
            ReplicationState::Stopped,
            dispatch.applied,
            dispatch.unmapped,
            dispatch.rejected,
            dispatch.failed
        );

        let checkpoints = ticker_result.map_err(|e| anyhow!("Checkpoint ticker failed: {e}"))?;
        match reader_result {
            Err(e) => return Err(e.context("Change log reader failed")),
            Ok(()) if !incremental.is_cancelled() => {
                return Err(anyhow!("Change log reader stopped without a shutdown request"))
            }
            Ok(()) => {}
        }

        Ok(ReplicationSummary {
            snapshot,
            resumed_from,
            dispatch,
            checkpoints,
        })
    }
}
