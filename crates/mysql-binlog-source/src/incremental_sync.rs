//! Change event dispatch to the target.
//!
//! Each decoded row change becomes exactly one statement against the target:
//!
//! - insert: `INSERT INTO t (cols...) VALUES (?...)` with the new row
//! - update: every column from the new row, addressed by the old row's key
//! - delete: addressed by the deleted row's key
//!
//! Failures never stop the stream. An unmapped table is logged and skipped,
//! an update or delete on a table without a primary key is refused, and a
//! target error is logged and the event dropped. Inserts are plain `INSERT`:
//! replaying an insert after a restart fails on the target's primary key and
//! is logged like any other write failure.

use anyhow::Result;
use async_trait::async_trait;
use checkpoint::Checkpoint;
use mysql_sink::{
    delete_statement, insert_statement, update_statement, Statement, TargetDatabase, WriteError,
};
use std::sync::Arc;
use sync_core::{ColumnSet, MappingTable, RowChange, RowChangeEvent, TableRef};
use tracing::{debug, error, info, warn};

use crate::source::EventSink;

const PROGRESS_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied { affected_rows: u64 },
    /// No mapping for the source table
    Unmapped,
    /// No statement could be built (missing primary key, wrong arity)
    Rejected,
    /// The target returned an error
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub applied: u64,
    pub unmapped: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn total(&self) -> u64 {
        self.applied + self.unmapped + self.rejected + self.failed
    }
}

/// Routes row change events to the target, one at a time.
pub struct ChangeDispatcher<T> {
    target: T,
    mappings: Arc<MappingTable>,
    stats: DispatchStats,
}

impl<T: TargetDatabase> ChangeDispatcher<T> {
    pub fn new(target: T, mappings: Arc<MappingTable>) -> Self {
        Self {
            target,
            mappings,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Apply one event to the target.
    pub async fn dispatch(&mut self, event: RowChangeEvent) -> DispatchOutcome {
        let kind = event.change.kind();

        let Some(route) = self
            .mappings
            .resolve(&event.table.database, &event.table.table)
        else {
            warn!("No mapping for {}, discarding {kind} event", event.table);
            self.stats.unmapped += 1;
            return DispatchOutcome::Unmapped;
        };
        let target_table = route.table_ref();

        let statement = match build_statement(&target_table, &event.columns, event.change) {
            Ok(statement) => statement,
            Err(e) => {
                warn!("Discarding {kind} event for {}: {e}", event.table);
                self.stats.rejected += 1;
                return DispatchOutcome::Rejected;
            }
        };

        debug!("Applying {kind} event {} -> {target_table}", event.table);

        match self.target.execute(statement).await {
            Ok(affected_rows) => {
                self.stats.applied += 1;
                if self.stats.applied % PROGRESS_LOG_EVERY == 0 {
                    info!("Applied {} change events", self.stats.applied);
                }
                DispatchOutcome::Applied { affected_rows }
            }
            Err(e) => {
                error!("Failed to apply {kind} event to {target_table}: {e:#}");
                self.stats.failed += 1;
                DispatchOutcome::Failed
            }
        }
    }
}

fn build_statement(
    target: &TableRef,
    columns: &ColumnSet,
    change: RowChange,
) -> Result<Statement, WriteError> {
    match change {
        RowChange::Insert(row) => insert_statement(target, columns.columns(), row),
        RowChange::Update { before, after } => update_statement(target, columns, &before, after),
        RowChange::Delete(row) => delete_statement(target, columns, &row),
    }
}

#[async_trait]
impl<T, P> EventSink<P> for ChangeDispatcher<T>
where
    T: TargetDatabase,
    P: Checkpoint + Send + Sync,
{
    async fn on_row_change(&mut self, event: RowChangeEvent) -> Result<()> {
        self.dispatch(event).await;
        Ok(())
    }

    async fn on_position_synced(&mut self, position: &P, force: bool) -> Result<()> {
        debug!(
            "Source position synced to {} (force: {force})",
            position.to_cli_string()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_async::Value;
    use mysql_sink::testing::MemoryTarget;
    use sync_core::{DatabaseMapping, TableMapping};

    fn src() -> TableRef {
        TableRef::new("sourceDB", "orders")
    }

    fn dst() -> TableRef {
        TableRef::new("targetDB", "orders")
    }

    fn columns(key: &[&str]) -> Arc<ColumnSet> {
        Arc::new(ColumnSet::with_key_names(vec!["id".into(), "amount".into()], key).unwrap())
    }

    fn dispatcher(key: &[&str]) -> (ChangeDispatcher<MemoryTarget>, MemoryTarget) {
        let target = MemoryTarget::new();
        target.create_table(dst(), (*columns(key)).clone());
        let mappings = MappingTable::new(vec![DatabaseMapping {
            source_database: "sourceDB".to_string(),
            target_database: "targetDB".to_string(),
            tables: vec![TableMapping {
                source_table: "orders".to_string(),
                target_table: "orders".to_string(),
            }],
        }])
        .unwrap();
        (
            ChangeDispatcher::new(target.clone(), Arc::new(mappings)),
            target,
        )
    }

    fn row(id: i64, amount: i64) -> Vec<Value> {
        vec![Value::Int(id), Value::Int(amount)]
    }

    fn event(change: RowChange, key: &[&str]) -> RowChangeEvent {
        RowChangeEvent::new(src(), columns(key), change)
    }

    #[tokio::test]
    async fn test_insert_event() {
        let (mut d, target) = dispatcher(&["id"]);

        let outcome = d
            .dispatch(event(RowChange::Insert(row(7, 42)), &["id"]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Applied { affected_rows: 1 });
        let executed = target.executed();
        assert_eq!(
            executed[0].sql,
            "INSERT INTO targetDB.orders (id, amount) VALUES (?, ?)"
        );
        assert_eq!(executed[0].params, row(7, 42));
    }

    #[tokio::test]
    async fn test_update_event_changes_only_the_keyed_row() {
        let (mut d, target) = dispatcher(&["id"]);
        target.seed_rows(&dst(), vec![row(7, 42), row(8, 1)]);

        let outcome = d
            .dispatch(event(
                RowChange::Update {
                    before: row(7, 42),
                    after: row(7, 99),
                },
                &["id"],
            ))
            .await;

        assert_eq!(outcome, DispatchOutcome::Applied { affected_rows: 1 });
        assert_eq!(
            target.executed()[0].sql,
            "UPDATE targetDB.orders SET id = ?, amount = ? WHERE id = ?"
        );
        assert_eq!(target.rows(&dst()), vec![row(7, 99), row(8, 1)]);
    }

    #[tokio::test]
    async fn test_update_event_with_key_change() {
        let (mut d, target) = dispatcher(&["id"]);
        target.seed_rows(&dst(), vec![row(7, 42)]);

        d.dispatch(event(
            RowChange::Update {
                before: row(7, 42),
                after: row(70, 42),
            },
            &["id"],
        ))
        .await;

        assert_eq!(target.rows(&dst()), vec![row(70, 42)]);
    }

    #[tokio::test]
    async fn test_delete_event() {
        let (mut d, target) = dispatcher(&["id"]);
        target.seed_rows(&dst(), vec![row(7, 99), row(8, 1)]);

        let outcome = d
            .dispatch(event(RowChange::Delete(row(7, 99)), &["id"]))
            .await;

        assert_eq!(outcome, DispatchOutcome::Applied { affected_rows: 1 });
        assert_eq!(
            target.executed()[0].sql,
            "DELETE FROM targetDB.orders WHERE id = ?"
        );
        assert_eq!(target.executed()[0].params, vec![Value::Int(7)]);
        assert_eq!(target.rows(&dst()), vec![row(8, 1)]);
    }

    #[tokio::test]
    async fn test_keyless_update_and_delete_write_nothing() {
        let (mut d, target) = dispatcher(&[]);
        target.seed_rows(&dst(), vec![row(7, 42)]);

        let update = d
            .dispatch(event(
                RowChange::Update {
                    before: row(7, 42),
                    after: row(7, 99),
                },
                &[],
            ))
            .await;
        let delete = d.dispatch(event(RowChange::Delete(row(7, 42)), &[])).await;

        assert_eq!(update, DispatchOutcome::Rejected);
        assert_eq!(delete, DispatchOutcome::Rejected);
        assert!(target.executed().is_empty());
        assert_eq!(d.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_unmapped_table_is_discarded() {
        let (mut d, target) = dispatcher(&["id"]);
        let other = RowChangeEvent::new(
            TableRef::new("sourceDB", "payments"),
            columns(&["id"]),
            RowChange::Insert(row(1, 1)),
        );

        assert_eq!(d.dispatch(other).await, DispatchOutcome::Unmapped);
        assert!(target.executed().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_logged_and_stream_continues() {
        let (mut d, target) = dispatcher(&["id"]);

        d.dispatch(event(RowChange::Insert(row(7, 42)), &["id"]))
            .await;
        let replay = d
            .dispatch(event(RowChange::Insert(row(7, 42)), &["id"]))
            .await;
        let next = d
            .dispatch(event(RowChange::Insert(row(8, 5)), &["id"]))
            .await;

        assert_eq!(replay, DispatchOutcome::Failed);
        assert_eq!(next, DispatchOutcome::Applied { affected_rows: 1 });
        assert_eq!(target.rows(&dst()), vec![row(7, 42), row(8, 5)]);
        assert_eq!(
            d.stats(),
            DispatchStats {
                applied: 2,
                unmapped: 0,
                rejected: 0,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_target_error_drops_event() {
        let (mut d, target) = dispatcher(&["id"]);
        target.fail_execute_call(0);

        let first = d
            .dispatch(event(RowChange::Insert(row(1, 1)), &["id"]))
            .await;
        let second = d
            .dispatch(event(RowChange::Insert(row(2, 2)), &["id"]))
            .await;

        assert_eq!(first, DispatchOutcome::Failed);
        assert_eq!(second, DispatchOutcome::Applied { affected_rows: 1 });
        assert_eq!(target.rows(&dst()), vec![row(2, 2)]);
        assert_eq!(d.stats().total(), 2);
    }
}
