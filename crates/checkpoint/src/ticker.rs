//! Periodic checkpoint writer.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{Checkpoint, CheckpointManager};

pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(3);

/// Counters reported when the ticker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickerStats {
    pub written: u64,
    pub failed: u64,
    /// Ticks that found no position published yet
    pub idle: u64,
}

/// Samples the reader's current position on a fixed interval and persists it.
///
/// The ticker is not synchronised with event processing: the sampled position
/// may be ahead of writes that are still in flight. A failed write is logged
/// and the previous checkpoint stays authoritative until the next tick.
/// Cancellation stops the ticker without a final write.
pub struct CheckpointTicker<C> {
    manager: CheckpointManager,
    position: watch::Receiver<Option<C>>,
    interval: Duration,
}

impl<C> CheckpointTicker<C>
where
    C: Checkpoint + Send + Sync + 'static,
{
    pub fn new(
        manager: CheckpointManager,
        position: watch::Receiver<Option<C>>,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_CHECKPOINT_INTERVAL
        } else {
            interval
        };
        Self {
            manager,
            position,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> TickerStats {
        let mut stats = TickerStats::default();
        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Checkpoint ticker started (interval {:?})", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => self.tick(&mut stats).await,
            }
        }

        info!(
            "Checkpoint ticker stopped: {} written, {} failed",
            stats.written, stats.failed
        );
        stats
    }

    async fn tick(&self, stats: &mut TickerStats) {
        let current = self.position.borrow().clone();
        let Some(position) = current else {
            debug!("No position published yet, skipping checkpoint");
            stats.idle += 1;
            return;
        };

        match self.manager.emit_checkpoint(&position).await {
            Ok(()) => stats.written += 1,
            Err(e) => {
                error!(
                    "Failed to write checkpoint {}: {e:#}",
                    position.to_cli_string()
                );
                stats.failed += 1;
            }
        }
    }
}
