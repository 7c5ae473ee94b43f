//! Command-line interface for mysql-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Snapshot the mapped tables, then follow the source binlog
//! mysql-sync run --config mysql-sync.yaml
//!
//! # Same, with a faster checkpoint cadence and a fixed replica id
//! mysql-sync run --config mysql-sync.yaml --checkpoint-interval 1s --server-id 4242
//!
//! # Snapshot only
//! mysql-sync snapshot --config mysql-sync.yaml
//!
//! # Show or overwrite the resume position
//! mysql-sync checkpoint show --position-path position.json
//! mysql-sync checkpoint set --position-path position.json mysql-bin.000003:4
//! ```
//!
//! ## Checkpoint Format
//! - MySQL binlog: `mysql-bin.000003:1234` (binlog file name + offset)

use anyhow::Context;
use checkpoint::{Checkpoint, CheckpointManager, CheckpointStorage};
use clap::{Parser, Subcommand};
use mysql_sink::MySQLTarget;
use mysql_sync::config::{Config, ConfigOverrides, ReplicationSettings};
use mysql_sync::replicate::{ReplicateOpts, Replicator};
use mysql_sync::shutdown::cancel_on_signal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_core::new_mysql_pool;
use sync_mysql_binlog_source::{
    BinlogOpts, BinlogPosition, MySQLBinlogReader, MySQLSnapshotSource, SyncOpts,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mysql-sync")]
#[command(about = "Replicate MySQL/MariaDB tables to another MySQL/MariaDB server")]
#[command(long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "MYSQL_SYNC_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot mapped tables, then replicate binlog changes until interrupted
    Run {
        /// Configuration file (YAML, or TOML with a .toml extension)
        #[arg(long, short, env = "MYSQL_SYNC_CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Copy mapped tables whose target is empty, then exit
    Snapshot {
        /// Configuration file (YAML, or TOML with a .toml extension)
        #[arg(long, short, env = "MYSQL_SYNC_CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    /// Inspect or overwrite the stored binlog position
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored position
    Show {
        /// Checkpoint file path
        #[arg(long, env = "MYSQL_SYNC_POSITION_PATH")]
        position_path: PathBuf,
    },

    /// Store a position for the next run to resume from
    Set {
        /// Checkpoint file path
        #[arg(long, env = "MYSQL_SYNC_POSITION_PATH")]
        position_path: PathBuf,

        /// Position as `<binlog file>:<offset>`, e.g. mysql-bin.000003:4
        position: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .with_context(|| format!("Invalid log level '{}'", cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { config, overrides } => {
            let settings = load_settings(&config, &overrides)?;
            run_replication(settings).await
        }
        Commands::Snapshot { config, overrides } => {
            let settings = load_settings(&config, &overrides)?;
            run_snapshot(settings).await
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { position_path } => show_checkpoint(position_path).await,
            CheckpointAction::Set {
                position_path,
                position,
            } => set_checkpoint(position_path, &position).await,
        },
    }
}

fn load_settings(path: &Path, overrides: &ConfigOverrides) -> anyhow::Result<ReplicationSettings> {
    let mut config = Config::load(path)?;
    config.apply_overrides(overrides);
    let settings = config.validate()?;

    info!(
        "Replicating {} tables from {} to {}",
        settings.mappings.len(),
        settings.source,
        settings.target
    );
    Ok(settings)
}

async fn run_replication(settings: ReplicationSettings) -> anyhow::Result<()> {
    let source_pool = new_mysql_pool(&settings.source);
    let target_pool = new_mysql_pool(&settings.target);
    let mappings = Arc::new(settings.mappings);

    let reader = MySQLBinlogReader::connect(
        source_pool.clone(),
        mappings.clone(),
        &BinlogOpts {
            server_id: settings.server_id,
        },
    )
    .await
    .context("Failed to set up the binlog reader")?;

    let replicator = Replicator::new(
        MySQLSnapshotSource::new(source_pool.clone(), settings.batch_size),
        MySQLTarget::new(target_pool.clone()),
        reader,
        mappings,
        ReplicateOpts {
            sync: SyncOpts {
                batch_size: settings.batch_size,
            },
            checkpoint_storage: settings.checkpoint_storage,
            checkpoint_interval: settings.checkpoint_interval,
        },
    );

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let result = replicator.run(shutdown).await;
    disconnect(source_pool, target_pool).await;
    let summary = result?;

    info!(
        "Replication stopped: {} snapshot rows, {} change events applied, {} checkpoints written",
        summary.snapshot.rows_inserted(),
        summary.dispatch.applied,
        summary.checkpoints.written
    );
    Ok(())
}

async fn run_snapshot(settings: ReplicationSettings) -> anyhow::Result<()> {
    let source_pool = new_mysql_pool(&settings.source);
    let target_pool = new_mysql_pool(&settings.target);

    let replicator = Replicator::snapshot_only(
        MySQLSnapshotSource::new(source_pool.clone(), settings.batch_size),
        MySQLTarget::new(target_pool.clone()),
        Arc::new(settings.mappings),
        ReplicateOpts {
            sync: SyncOpts {
                batch_size: settings.batch_size,
            },
            ..ReplicateOpts::default()
        },
    );

    let report = replicator.run_snapshot().await;
    disconnect(source_pool, target_pool).await;

    info!(
        "Snapshot finished: {} tables, {} rows inserted",
        report.tables.len(),
        report.rows_inserted()
    );
    Ok(())
}

async fn disconnect(source: mysql_async::Pool, target: mysql_async::Pool) {
    if let Err(e) = source.disconnect().await {
        warn!("Failed to close source connections: {e}");
    }
    if let Err(e) = target.disconnect().await {
        warn!("Failed to close target connections: {e}");
    }
}

async fn show_checkpoint(position_path: PathBuf) -> anyhow::Result<()> {
    let manager = CheckpointManager::new(&CheckpointStorage::from_path(Some(position_path)));
    match manager.load_checkpoint::<BinlogPosition>().await {
        Some(position) => println!("{}", position.to_cli_string()),
        None => println!("No checkpoint"),
    }
    Ok(())
}

async fn set_checkpoint(position_path: PathBuf, position: &str) -> anyhow::Result<()> {
    let position = BinlogPosition::from_cli_string(position)?;
    let manager = CheckpointManager::new(&CheckpointStorage::from_path(Some(position_path)));
    manager.emit_checkpoint(&position).await?;
    info!(
        "Stored checkpoint {} at {}",
        position.to_cli_string(),
        manager.location().unwrap_or_default()
    );
    Ok(())
}
